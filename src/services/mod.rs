//! Business logic services

pub mod cancellation;
pub mod clusterer;
pub mod directory;
pub mod geo;
pub mod mapping;
pub mod orchestrator;
pub mod repository;
pub mod sequencer;
pub mod stop_planner;
pub mod sweep;
