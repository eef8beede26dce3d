//! `waypost` – operator shell for the round-trip mission supervisor.
//!
//! 1. Installs the tracing pipeline (`RUST_LOG`, `WAYPOST_LOG_FORMAT`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads `~/.waypost/config.toml`, writing a default one on first run.
//! 3. Builds the Tokio runtime the mission worker lives on.
//! 4. Intercepts **Ctrl-C** to raise `quit` on the mission.
//! 5. Drops the operator into an interactive REPL.

mod announcer;
mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use waypost_middleware::{StaticEndpoint, Topic, WsConnector};
use waypost_runtime::{MissionController, NameCache};

/// How long the CLI waits for the worker to close its connection on exit.
const EXIT_GRACE: Duration = Duration::from_secs(5);

fn main() {
    let _telemetry = waypost_runtime::telemetry::init_tracing("waypost");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}; add your route under [mission].",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("waypost-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    let endpoint = cfg.robot.endpoint();
    let names = Arc::new(NameCache::from_entries(cfg.names.clone()));
    let ctl = Arc::new(MissionController::new(
        cfg.tuning.clone(),
        Arc::new(WsConnector::new(Arc::new(StaticEndpoint(endpoint.clone())))),
        Arc::clone(&names),
        cfg.mission.safe_location.clone(),
        runtime.handle().clone(),
    ));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = shutdown.clone();
    let ctl_ctrlc = Arc::clone(&ctl);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – quitting mission …".yellow().bold());
        ctl_ctrlc.quit();
        println!("{}", "  ✓ Quit raised. Press Enter to exit.".green());
        shutdown_ctrlc.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not quit the mission");
    }

    announcer::spawn(
        runtime.handle(),
        [Topic::Telemetry, Topic::Mission, Topic::Alerts]
            .into_iter()
            .map(|t| ctl.subscribe(t))
            .collect(),
        names,
    );

    println!("  Robot endpoint {}", endpoint.url().dimmed());
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&ctl, &cfg, shutdown);

    // ── Shutdown ──────────────────────────────────────────────────────────
    ctl.quit();
    let outcome = runtime.block_on(async {
        tokio::time::timeout(EXIT_GRACE, ctl.join()).await
    });
    match outcome {
        Ok(Some(r)) => println!("  Mission ended: {}", r.message),
        Ok(None) => {}
        Err(_) => warn!("mission worker did not finish within the exit grace period"),
    }
    runtime.shutdown_timeout(Duration::from_secs(1));
}

fn print_banner() {
    println!();
    println!("{}", r#" _      __                         __ "#.bold().cyan());
    println!("{}", r#"| | /| / /__ ___ _____  ___  ___ / /_"#.bold().cyan());
    println!("{}", r#"| |/ |/ / _ `/ // / _ \/ _ \(_-</ __/"#.bold().cyan());
    println!("{}", r#"|__/|__/\_,_/\_, / .__/\___/___/\__/ "#.bold().cyan());
    println!("{}", r#"            /___/_/                  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "waypost".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Unattended round-trip mission supervisor");
    println!();
}
