//! # Tessera demo launcher
//!
//! Runs the shell against the in-memory compositor:
//! - the compositor side (outputs, clients, frames, input) on a worker thread
//! - the shell's UI loop on the main thread
//!
//! Shutdown goes through the same blocking compositor-stopping handoff a
//! real compositor integration uses.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tessera::backend::HeadlessStack;
use tessera::clock::{RealTimeSource, TimeSource};
use tessera::{logging, ShellConfig};

mod demo;

use demo::Demo;

/// How long the UI loop waits for work before polling its timers
const UI_TICK: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Shell integration layer, driven by a headless compositor with simulated clients")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/tessera/tessera.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Number of simulated clients, one window each
    #[arg(long, default_value_t = 2)]
    clients: u32,

    /// Frames every client posts before the demo shuts down
    #[arg(long, default_value_t = 120)]
    frames: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The log level lives in the config, so load it before logging is up
    let loaded = ShellConfig::load(&cli.config);
    let config = loaded.as_ref().cloned().unwrap_or_default();
    logging::init(&config.logging, cli.debug);

    info!("🚀 Starting Tessera shell");
    info!(
        "📄 Version: {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_COMMIT").unwrap_or("unknown commit"),
        env!("BUILD_DATE")
    );

    match &loaded {
        Ok(_) => info!("✅ Configuration loaded from: {}", cli.config),
        Err(e) => {
            error!("❌ Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
        }
    }

    let clock: Arc<dyn TimeSource> = Arc::new(RealTimeSource::new());
    let (stack, mut shell, ui_loop) = HeadlessStack::new(&config, clock);
    let ui = stack.ui.clone();

    let stop = Arc::new(AtomicBool::new(false));
    let interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Interrupt received, winding down clients");
            interrupt.store(true, Ordering::SeqCst);
        }
    });

    info!("🏗️  Starting headless compositor with {} clients", cli.clients);
    let demo = Demo {
        clients: cli.clients,
        frames: cli.frames,
        handoff_timeout: config.dispatch.handoff_timeout(),
        stop,
    };
    let compositor = tokio::task::spawn_blocking(move || demo.run(stack, ui));

    // The shell is bound to this thread for the rest of the run
    tokio::task::block_in_place(|| ui_loop.run(&mut shell, UI_TICK));

    let summary = compositor.await??;
    info!(
        "✨ {} windows, {} frames, {} key events, {} signals",
        summary.windows_opened, summary.frames_posted, summary.keys_sent, summary.signals
    );
    info!(
        "📊 Left behind: {} surfaces, {} sessions",
        summary.surfaces_left, summary.sessions_left
    );

    info!("👋 Tessera shutting down");
    Ok(())
}
