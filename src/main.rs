//! CLI for ackbus
//!
//! Subcommands:
//! - `demo`: run the NBA game demo against an in-process broker
//! - `fantasy-server`: serve only the fantasy calculator push endpoint

use std::sync::Arc;

use ackbus::config::{Settings, load_config};
use ackbus::demo::{DemoReport, FantasyCalculator, fantasy_router, run_demo};
use ackbus::transport::serve;
use ackbus::utils::logging;
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ackbus")]
enum Command {
    /// Run the full demo: producer, pull consumers, push endpoint, dead letters
    Demo {
        /// Number of game events to publish (overrides the configuration)
        #[arg(long)]
        events: Option<usize>,
        /// How long the consumers listen, in seconds
        #[arg(long)]
        duration: Option<u64>,
        /// Share of notifications that fail, between 0 and 1
        #[arg(long)]
        failure_rate: Option<f64>,
    },
    /// Start the fantasy calculator push endpoint on its own
    FantasyServer {
        /// Port to listen on (overrides the configuration)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    logging::init(&config.demo.log_level);

    let result = match cmd {
        Command::Demo {
            events,
            duration,
            failure_rate,
        } => {
            let mut config = config;
            if let Some(events) = events {
                config.demo.events = events;
            }
            if let Some(duration) = duration {
                config.demo.duration_secs = duration;
            }
            if let Some(failure_rate) = failure_rate {
                config.demo.failure_rate = failure_rate;
            }
            demo(config).await
        }
        Command::FantasyServer { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            fantasy_server(config).await
        }
    };

    if let Err(e) = result {
        error!("ackbus failed: {}", e);
    }
}

async fn demo(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    tokio::select! {
        report = run_demo(&config) => print_report(&report?),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

async fn fantasy_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let calculator = Arc::new(FantasyCalculator::new());

    tokio::select! {
        result = serve(&addr, fantasy_router(calculator)) => {
            result?;
            error!("Fantasy server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

fn print_report(report: &DemoReport) {
    println!("\nPublished {} game events", report.published.len());

    println!("\nFINAL PLAYER STATS:");
    for (player, stats) in &report.stats {
        println!(
            "  {player}: {} points, {} events",
            stats.total_points, stats.events
        );
    }

    let notifications = &report.notifications;
    println!("\nNOTIFICATION SERVICE:");
    println!("  Successful: {}", notifications.processed);
    println!("  Failed: {}", notifications.failed);
    println!("  Success rate: {:.1}%", notifications.success_rate);

    println!("\nFANTASY CALCULATOR:");
    println!("  Events processed: {}", report.fantasy.total_events);
    println!(
        "  Total fantasy points: {:.1}",
        report.fantasy.total_fantasy_points
    );
    for (player, points) in &report.fantasy.player_totals {
        println!("  {player}: {points:.1}");
    }

    println!("\nDEAD LETTERS: {}", report.dead_letters.len());
    for dead in &report.dead_letters {
        println!(
            "  {} (from {}, {} attempts)",
            dead.headline, dead.original_subscription, dead.delivery_attempts
        );
    }
}
