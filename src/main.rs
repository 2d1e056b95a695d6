//! Retinue - headless match-3 scoring demo
//!
//! Runs a seeded board simulation on top of the Retinue entity runtime and
//! logs what happens each tick. Pass `--save-settings` to write the active
//! settings to the config directory.

mod demo;
mod settings;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use demo::Board;
use settings::DemoSettings;

fn main() -> Result<()> {
    // Settings pick the log level, so load them under a temporary subscriber
    let settings = tracing::subscriber::with_default(subscriber("info"), DemoSettings::load);
    tracing::subscriber::set_global_default(subscriber(&settings.log_level))
        .context("Failed to set tracing subscriber")?;

    if std::env::args().any(|arg| arg == "--save-settings") {
        settings.save().context("Failed to save settings")?;
    }

    info!(
        "Starting Retinue demo: {} ticks on {} cells, seed {}",
        settings.ticks,
        settings.board.cell_count(),
        settings.seed
    );

    let mut board = Board::new(&settings).context("Failed to set up the board")?;
    let mut destroyed = 0;
    for _ in 0..settings.ticks {
        let report = board.tick().context("Simulation tick failed")?;
        destroyed += report.destroyed;
        debug!(
            "+{} points, score {}: {} pieces on the board, {} entities pooled",
            report.points,
            report.score,
            board.pieces().count(),
            board.world().reusable_entities_count()
        );
    }

    let score = board.score().context("Score is missing")?;
    board
        .shutdown()
        .context("World did not shut down cleanly")?;

    info!("Final score {} from {} destroyed pieces", score, destroyed);
    Ok(())
}

/// Build a subscriber honoring `RUST_LOG`, falling back to `default_level`.
fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish()
}
