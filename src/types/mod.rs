//! Type definitions

pub mod cluster;
pub mod route;
pub mod stop;
pub mod student;

pub use cluster::*;
pub use route::*;
pub use stop::*;
pub use student::*;
