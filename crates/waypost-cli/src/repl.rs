//! REPL – Read-Eval-Print Loop for the waypost operator shell.
//!
//! Supported slash-commands:
//!   /help               – show this list
//!   /start [ids...]     – start the configured route, or the given one
//!   /pause, /resume     – hold and continue navigation
//!   /stop               – end the mission after the current step
//!   /emergency          – divert to the safe location and halt
//!   /status [--json]    – mission state, position, last result
//!   /battery            – most recent battery reading
//!   /names [reload]     – display-name table
//!   /quit | /exit       – quit the mission and exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use waypost_kernel::StatusSnapshot;
use waypost_runtime::MissionController;
use waypost_types::ControlResponse;

use crate::config::{self, Config};

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(ctl: &MissionController, cfg: &Config, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "waypost>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();

        match cmd {
            "/help" => cmd_help(),
            "/start" => cmd_start(ctl, cfg, &args),
            "/pause" => print_response(&ctl.pause()),
            "/resume" => print_response(&ctl.resume()),
            "/stop" => print_response(&ctl.stop()),
            "/emergency" => print_response(&ctl.trigger_emergency()),
            "/status" => cmd_status(&ctl.status(), args.first() == Some(&"--json")),
            "/battery" => cmd_battery(ctl),
            "/names" => cmd_names(ctl, args.first() == Some(&"reload")),
            "/quit" | "/exit" => {
                print_response(&ctl.quit());
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            other => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "waypost Commands".bold().underline());
    println!("  {}  – start the configured route, or the given ids", "/start [ids...]".bold().cyan());
    println!("  {}    – hold and continue navigation", "/pause  /resume".bold().cyan());
    println!("  {}             – end the mission", "/stop".bold().cyan());
    println!("  {}        – divert to the safe location and halt", "/emergency".bold().cyan());
    println!("  {} – mission state and progress", "/status [--json]".bold().cyan());
    println!("  {}          – most recent battery reading", "/battery".bold().cyan());
    println!("  {}  – display names, optionally re-read from config", "/names [reload]".bold().cyan());
    println!("  {}     – quit the mission and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_start(ctl: &MissionController, cfg: &Config, args: &[&str]) {
    let locations: Vec<String> = if args.is_empty() {
        cfg.mission.locations.clone()
    } else {
        args.iter().map(|s| s.to_string()).collect()
    };
    if cfg.mission.safe_location.is_none() {
        println!(
            "  {} no safe location configured; /emergency will fail",
            "Warning:".yellow()
        );
    }
    print_response(&ctl.start_mission(locations, &cfg.mission.charge_location));
}

fn cmd_status(status: &StatusSnapshot, json: bool) {
    if json {
        match serde_json::to_string_pretty(status) {
            Ok(s) => println!("{s}"),
            Err(e) => println!("{}: {}", "Serialization error".red(), e),
        }
        return;
    }
    println!("{}", "Mission Status".bold().underline());
    println!("  State    : {}", format!("{:?}", status.state).yellow());
    println!("  Cycle    : {}", status.cycle);
    println!("  Phase    : {:?} (position {})", status.phase, status.position);
    if let Some(current) = &status.current_leg {
        println!("  Current  : {}", current.bold());
    }
    if !status.upcoming_legs.is_empty() {
        println!("  Upcoming : {}", status.upcoming_legs.join(", "));
    }
    let failed = status.outcomes.iter().filter(|o| !o.success).count();
    println!(
        "  Hops     : {} done, {} failed",
        status.outcomes.len() - failed,
        failed
    );
    if let Some(result) = &status.last_result {
        print!("  Last run : ");
        print_response(result);
    }
}

fn cmd_battery(ctl: &MissionController) {
    match ctl.battery() {
        Some(r) => println!(
            "  Battery {}% ({:?})",
            r.level_percent.to_string().bold(),
            r.charging_status
        ),
        None => println!("  {}", "No battery reading yet.".dimmed()),
    }
}

fn cmd_names(ctl: &MissionController, reload: bool) {
    if reload {
        match config::load() {
            Ok(Some(cfg)) => ctl.refresh_names(cfg.names),
            Ok(None) => println!("  {}", "No config file; keeping current names.".dimmed()),
            Err(e) => {
                println!("{}: {}", "Config error".red(), e);
                return;
            }
        }
    }
    let names = ctl.names();
    if names.is_empty() {
        println!("  {}", "No display names configured.".dimmed());
    }
    for (id, name) in names {
        println!("  {} {}", id.dimmed(), name.bold());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_response(r: &ControlResponse) {
    if r.success {
        println!("{} {}", "✓".green().bold(), r.message);
    } else {
        println!("{} {}", "✗".red().bold(), r.message.red());
    }
}
