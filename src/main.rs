//! Busplan Worker - bus stop placement and route optimization
//!
//! Reads student home locations, places bus stops within the walking
//! budget, packs capacitated routes and writes the outcome as JSON.

mod cli;
mod config;
mod defaults;
mod error;
mod services;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::cli::{Cli, Command, StrategyArg};
use crate::services::cancellation::CANCELLATION;
use crate::services::directory::{CsvStudentDirectory, StudentDirectory};
use crate::services::mapping::create_mapping_service;
use crate::services::orchestrator::{PipelineStrategy, PlannerConfig, RoutePlanner};
use crate::services::repository::InMemoryRepository;
use crate::types::Depot;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    std::fs::create_dir_all(&config.logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &config.logs_dir,
        "worker.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stderr and file (stdout carries the outcome JSON)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,busplan_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Plan {
            students,
            depot_lat,
            depot_lng,
            depot_name,
            strategy,
            walk_radius,
            stop_capacity,
            max_stops,
            vehicle_capacity,
            clusters,
            seed,
            output,
        } => {
            let directory = CsvStudentDirectory::new(&students);
            let listing = directory.active_students().await?;
            info!(
                "Loaded {} students ({} excluded for unusable coordinates)",
                listing.students.len(),
                listing.excluded_count
            );

            let mapper = create_mapping_service(&config.nominatim_url, config.valhalla_url.clone()).await;
            let repo = InMemoryRepository::new();
            let depot = Depot { name: depot_name, lat: depot_lat, lng: depot_lng };

            let planner = RoutePlanner::new(PlannerConfig {
                strategy: match strategy {
                    StrategyArg::ClusterFirst => PipelineStrategy::ClusterFirst,
                    StrategyArg::CoverageFirst => PipelineStrategy::CoverageFirst,
                },
                walk_radius_m: walk_radius,
                max_students_per_stop: stop_capacity,
                max_stops,
                vehicle_capacity,
                cluster_count: clusters,
                seed,
                ..PlannerConfig::default()
            });

            let run_id = Uuid::new_v4();
            let _run_guard = CANCELLATION.register(run_id);

            // Ctrl-C cancels cooperatively at the next cluster/route boundary
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling run {}", run_id);
                    CANCELLATION.cancel(&run_id);
                }
            });

            let outcome = planner
                .run(run_id, &listing.students, &depot, mapper.as_ref(), &repo)
                .await
                .with_context(|| format!("Optimization run {} failed", run_id))?;

            let json = serde_json::to_string_pretty(&outcome)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &json)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Outcome written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}
