//! `busbridge` – bridges the local signal bus to an MQTT-style broker.
//!
//! 1. Loads the configuration (`--config <path>` or `~/.busbridge/config.toml`).
//! 2. Opens the broker session; a failure here is the only fatal error.
//!    The bus and broker are still the in-process implementations, which is
//!    announced at startup.
//! 3. Seeds the configured routes and starts the bridge tasks.
//! 4. Runs until `exit` at the console or Ctrl-C.  End of input only closes
//!    the console.

mod config;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use busbridge_middleware::{LocalBus, MemoryBroker};
use busbridge_router::telemetry;
use busbridge_router::{Bridge, BridgeContext};
use clap::Parser;
use colored::Colorize;
use repl::ConsoleAction;
use tokio::sync::Notify;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "busbridge")]
#[command(about = "Forward bus signals to broker topics and broker commands to the bus")]
struct Cli {
    /// Configuration file (default: ~/.busbridge/config.toml)
    #[arg(short, long, env = "BUSBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    // Tracing goes first: the span exporter must be built outside the runtime.
    let _guard = telemetry::init_tracing("busbridge");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    print_banner();

    let path = cli.config.unwrap_or_else(config::config_path);
    let cfg = config::load(&path);
    println!("  Config: {}", path.display().to_string().bold());

    let client_id = cfg.mqtt.effective_client_id();
    let broker = match MemoryBroker::connect(&cfg.mqtt.servers, client_id.clone()) {
        Ok(broker) => broker,
        Err(e) => {
            error!(servers = ?cfg.mqtt.servers, error = %e, "cannot connect to broker");
            eprintln!("{}: {e}", "Broker connection failed".red().bold());
            return ExitCode::FAILURE;
        }
    };
    // Both transports are the in-process stand-ins until a network broker
    // client and a session-bus client are plugged in behind the traits.
    warn!(
        servers = ?cfg.mqtt.servers,
        client_id = %client_id,
        "running on the in-process bus and broker; no network connection is opened"
    );
    if cfg.mqtt.has_credentials() {
        warn!("mqtt username/password are not used by the in-process broker");
    }
    println!(
        "  {} {}",
        "Transport:".yellow().bold(),
        transport_notice(&cfg.mqtt.servers, &client_id)
    );

    let bus = LocalBus::default();
    let ctx = Arc::new(BridgeContext::new(
        Arc::new(bus),
        Arc::new(broker),
        cfg.bridge.to_settings(),
    ));
    let seeded = ctx.seed_static(cfg.routing_entries()).await;
    println!("  Routes: {} static", seeded.to_string().bold());

    let bridge = match Bridge::start(Arc::clone(&ctx)).await {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "bridge failed to start");
            eprintln!("{}: {e}", "Bridge failed to start".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let interrupted = Arc::new(Notify::new());
    let on_signal = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || on_signal.notify_one()) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    // A plain thread: a console blocked in readline must not hold up exit.
    let (console_done_tx, console_done) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let _ = console_done_tx.send(repl::run());
    });
    println!("  Type {} or press Ctrl-C to stop.\n", "exit".bold().cyan());

    let console_closed = tokio::select! {
        action = console_done => !matches!(action, Ok(ConsoleAction::Exit)),
        _ = interrupted.notified() => {
            announce_interrupt();
            false
        }
    };
    if console_closed {
        info!("console closed; bridge keeps running until Ctrl-C");
        interrupted.notified().await;
        announce_interrupt();
    }

    bridge.shutdown().await;
    println!("{}", "Bridge stopped.".green());
    ExitCode::SUCCESS
}

fn transport_notice(servers: &[String], client_id: &str) -> String {
    format!(
        "in-process bus and broker, no network session ({} configured as {client_id})",
        servers.join(", ")
    )
}

fn announce_interrupt() {
    println!();
    println!("{}", "Ctrl-C received, shutting down.".yellow().bold());
}

fn print_banner() {
    println!();
    println!("{}", "busbridge".bold().cyan());
    println!("{}", "  signal bus <-> broker bridge".dimmed());
    println!();
}
