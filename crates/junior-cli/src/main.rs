//! `junior` – remote control for the Junior vehicle.
//!
//! 1. Checks for `~/.junior/config.toml`; runs a first-run wizard when the
//!    file is absent.
//! 2. Probes the vehicle's Wi-Fi command endpoint when the HTTP transport is
//!    selected.
//! 3. Drops the user into an interactive REPL (`/drive`, `/scan`,
//!    `/snapshot`, `/record`, `/settings`, `/help`).
//! 4. Ctrl-C raises a shared flag; an active drive stops the vehicle before
//!    the CLI exits.

mod config;
mod drive;
mod probe;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use config::TransportKind;

fn main() {
    // Set JUNIOR_LOG_FILE while keyboard driving, the terminal is in raw mode.
    let _tracing = junior_runtime::init_tracing("junior");

    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop an active drive");
    }

    match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(_)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }

    let cfg = config::load().ok().flatten().unwrap_or_default();

    if cfg.session.transport == TransportKind::Http {
        print!("\n  Probing {} at {} … ", cfg.session.name.bold(), cfg.http.command_url().dimmed());
        match probe::probe_vehicle(&cfg.http) {
            Ok(dist) => println!("{} (distance {} cm)", "online".green(), dist),
            Err(_) => {
                println!("{}", "offline".yellow());
                println!(
                    "  {}  Join the vehicle's access point or fix the IP with {}.",
                    "No vehicle answered.".dimmed(),
                    "/settings".bold()
                );
            }
        }
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(shutdown, &rt);
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Junior First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up your vehicle.\n");

    let mut cfg = config::Config::default();

    cfg.session.name = repl::prompt_str(
        &format!("  Vehicle name [{}]: ", cfg.session.name),
        &cfg.session.name,
    );

    println!("  How do you connect to the vehicle?");
    println!("    1) Wi-Fi / HTTP  (default)");
    println!("    2) Bluetooth LE");
    println!("    3) Simulator     (no hardware)");
    let choice = repl::prompt_str("  Enter choice [1]: ", "1");
    cfg.session.transport = match choice.trim() {
        "2" => TransportKind::Ble,
        "3" => TransportKind::Sim,
        _ => TransportKind::Http,
    };

    match cfg.session.transport {
        TransportKind::Http => {
            cfg.http.ip_addr = repl::prompt_str(
                &format!("  Vehicle IP address [{}]: ", cfg.http.ip_addr),
                &cfg.http.ip_addr,
            );
        }
        TransportKind::Ble => {
            println!("  Use {} later to find the address.", "/scan".bold());
            cfg.ble.device_addr = repl::prompt_str("  BLE device address []: ", "");
        }
        TransportKind::Sim => {}
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"     __            _           "#.bold().cyan());
    println!("{}", r#"  __/ /_ _____  (_)__  ____  "#.bold().cyan());
    println!("{}", r#" / // / // / _ \/ / _ \/ __/  "#.bold().cyan());
    println!("{}", r#" \___/\_,_/_//_/_/\___/_/     "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Junior".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Remote control for the Junior vehicle");
    println!();
}
