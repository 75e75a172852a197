//! CLI argument parsing for the busplan-worker binary.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "busplan-worker", about = "Bus stop placement and route optimization worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Cluster students first, then plan stops and one route per cluster
    ClusterFirst,
    /// Minimize stop count globally, then bin-pack routes by angular sweep
    CoverageFirst,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one optimization pass over a student CSV file
    Plan {
        /// Path to the student CSV (columns: id, lat, lng, home_address)
        #[arg(long)]
        students: std::path::PathBuf,

        /// Depot (school) latitude
        #[arg(long)]
        depot_lat: f64,

        /// Depot (school) longitude
        #[arg(long)]
        depot_lng: f64,

        /// Depot display name
        #[arg(long, default_value = "School")]
        depot_name: String,

        /// Pipeline composition
        #[arg(long, value_enum, default_value_t = StrategyArg::CoverageFirst)]
        strategy: StrategyArg,

        /// Maximum walking distance in meters
        #[arg(long, default_value_t = crate::defaults::DEFAULT_WALK_RADIUS_M)]
        walk_radius: f64,

        /// Maximum students per stop
        #[arg(long, default_value_t = crate::defaults::DEFAULT_MAX_STUDENTS_PER_STOP)]
        stop_capacity: usize,

        /// Optional cap on the number of stops
        #[arg(long)]
        max_stops: Option<usize>,

        /// Seats per vehicle
        #[arg(long, default_value_t = crate::defaults::DEFAULT_VEHICLE_CAPACITY)]
        vehicle_capacity: u32,

        /// Cluster count for cluster-first (0 derives from capacity)
        #[arg(long, default_value_t = 0)]
        clusters: i32,

        /// Seed for reproducible clustering
        #[arg(long)]
        seed: Option<u64>,

        /// Write the outcome JSON here instead of stdout
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },
}
