//! Interactive shell.
//!
//! Supported slash-commands:
//!   /help                     – show this list
//!   /settings                 – interactively edit `~/.junior/config.toml`
//!   /probe                    – check the Wi-Fi command endpoint
//!   /scan                     – list nearby BLE devices
//!   /drive                    – start a driving session
//!   /snapshot [lo|hi] [file]  – save one camera still
//!   /record <count> [dir]     – save frames from the MJPEG stream
//!   /quit | /exit             – exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use junior_hal::Resolution;
use junior_middleware::{BleSession, HttpCamera};
use junior_types::JuniorError;
use tokio::runtime::Runtime;

use crate::config::{self, Config, InputKind, TransportKind};
use crate::{drive, probe};

const DEFAULT_RECORD_DIR: &str = "frames";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Settings,
    Probe,
    Scan,
    Drive,
    Snapshot {
        resolution: Resolution,
        path: Option<PathBuf>,
    },
    Record {
        count: usize,
        dir: PathBuf,
    },
    Quit,
}

/// Parse one input line.  Errors carry a message for the operator.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    match (head, args.as_slice()) {
        ("/help", []) => Ok(Command::Help),
        ("/settings", []) => Ok(Command::Settings),
        ("/probe", []) => Ok(Command::Probe),
        ("/scan", []) => Ok(Command::Scan),
        ("/drive", []) => Ok(Command::Drive),
        ("/snapshot", rest) if rest.len() <= 2 => {
            let resolution = match rest.first() {
                Some(r) => r.parse::<Resolution>().map_err(|e| e.to_string())?,
                None => Resolution::default(),
            };
            Ok(Command::Snapshot {
                resolution,
                path: rest.get(1).map(PathBuf::from),
            })
        }
        ("/record", [count, rest @ ..]) if rest.len() <= 1 => {
            let count = count
                .parse::<usize>()
                .ok()
                .filter(|c| *c > 0)
                .ok_or_else(|| format!("'{count}' is not a positive frame count"))?;
            let dir = rest
                .first()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORD_DIR));
            Ok(Command::Record { count, dir })
        }
        ("/quit" | "/exit", []) => Ok(Command::Quit),
        ("/snapshot" | "/record" | "/help" | "/settings" | "/probe" | "/scan" | "/drive", _) => {
            Err(format!("bad arguments for {head}"))
        }
        (other, _) => Err(format!("unknown command '{other}'")),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
/// Async work runs on `rt`.
pub fn run(shutdown: Arc<AtomicBool>, rt: &Runtime) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "junior>".bold().cyan());
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

        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Settings) => cmd_settings(),
            Ok(Command::Probe) => cmd_probe(),
            Ok(Command::Scan) => cmd_scan(rt),
            Ok(Command::Drive) => cmd_drive(rt, &shutdown),
            Ok(Command::Snapshot { resolution, path }) => cmd_snapshot(rt, resolution, path),
            Ok(Command::Record { count, dir }) => cmd_record(rt, count, dir),
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(msg) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    msg.yellow(),
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
    println!("{}", "Junior Commands".bold().underline());
    println!("  {}                 – edit ~/.junior/config.toml settings", "/settings".bold().cyan());
    println!("  {}                    – check the Wi-Fi command endpoint", "/probe".bold().cyan());
    println!("  {}                     – list nearby BLE devices", "/scan".bold().cyan());
    println!("  {}                    – start driving", "/drive".bold().cyan());
    println!("  {}  – save one camera still", "/snapshot [lo|hi] [file]".bold().cyan());
    println!("  {}     – save frames from the live stream", "/record <count> [dir]".bold().cyan());
    println!("  {}             – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
    println!("{}", "Driving keys".bold().underline());
    println!("  W/S  left throttle     A/D  left direction");
    println!("  ↑/↓  right throttle    ←/→  right direction");
    println!("  Q, Esc or Ctrl-C to stop");
    println!();
}

fn cmd_settings() {
    let mut cfg = match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {}", "Error loading config".red(), e);
            return;
        }
    };

    println!("{}", "Settings Editor".bold().underline());
    println!(
        "  Transport      : {} (ble / http / sim)",
        cfg.session.transport.to_string().yellow()
    );
    let raw = prompt_str(
        &format!("  Transport      [{}]: ", cfg.session.transport),
        &cfg.session.transport.to_string(),
    );
    match raw.parse::<TransportKind>() {
        Ok(kind) => cfg.session.transport = kind,
        Err(e) => println!("  {} {}", "Warning:".yellow(), e),
    }

    println!(
        "  Input          : {} (auto / keyboard / gamepad)",
        cfg.session.input.to_string().yellow()
    );
    let raw = prompt_str(
        &format!("  Input          [{}]: ", cfg.session.input),
        &cfg.session.input.to_string(),
    );
    match raw.parse::<InputKind>() {
        Ok(kind) => cfg.session.input = kind,
        Err(e) => println!("  {} {}", "Warning:".yellow(), e),
    }

    cfg.http.ip_addr = prompt_str(
        &format!("  Vehicle IP     [{}]: ", cfg.http.ip_addr),
        &cfg.http.ip_addr,
    );
    cfg.http.cmd_port = prompt_u16(
        &format!("  Command port   [{}]: ", cfg.http.cmd_port),
        cfg.http.cmd_port,
    );
    cfg.http.cam_port = prompt_u16(
        &format!("  Camera port    [{}]: ", cfg.http.cam_port),
        cfg.http.cam_port,
    );
    cfg.ble.device_addr = prompt_str(
        &format!("  BLE address    [{}]: ", cfg.ble.device_addr),
        &cfg.ble.device_addr,
    );

    if let Err(e) = cfg.validate() {
        println!("  {} {}", "Warning:".yellow(), e);
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

fn cmd_probe() {
    let cfg = load_config_or_default();
    print!("  Probing {} … ", cfg.http.command_url().dimmed());
    io::stdout().flush().ok();
    match probe::probe_vehicle(&cfg.http) {
        Ok(dist) => println!("{} (distance {} cm)", "online".green(), dist),
        Err(e) => {
            println!("{}", "offline".red());
            println!("  {}", e.dimmed());
        }
    }
}

fn cmd_scan(rt: &Runtime) {
    let cfg = load_config_or_default();
    println!("  Scanning for {} s …", cfg.ble.scan_secs);
    match rt.block_on(BleSession::scan(Duration::from_secs(cfg.ble.scan_secs))) {
        Ok(devices) if devices.is_empty() => println!("  {}", "No devices found.".yellow()),
        Ok(devices) => {
            for d in &devices {
                let marker = if d.address.eq_ignore_ascii_case(&cfg.ble.device_addr) {
                    "▶"
                } else {
                    " "
                };
                println!(
                    "    {} {}  {}",
                    marker.green(),
                    d.address.bold(),
                    d.name.as_deref().unwrap_or("(unnamed)")
                );
            }
        }
        Err(e) => println!("{}: {}", "Scan failed".red(), e),
    }
}

fn cmd_drive(rt: &Runtime, shutdown: &Arc<AtomicBool>) {
    let cfg = load_config_or_default();
    if let Err(e) = cfg.validate() {
        println!("{}: {}", "Config error".red(), e);
        return;
    }

    println!(
        "  Driving {} over {} – press {} to stop.",
        cfg.session.name.bold(),
        cfg.session.transport.to_string().yellow(),
        "Q".bold()
    );

    let input = match drive::build_input(&cfg) {
        Ok(i) => i,
        Err(e) => {
            println!("{}: {}", "Input error".red(), e);
            return;
        }
    };
    let mut session = match drive::build_session(&cfg, input, shutdown.clone()) {
        Ok(s) => s,
        Err(e) => {
            println!("{}: {}", "Session error".red(), e);
            return;
        }
    };

    let outcome = rt.block_on(async {
        session.start().await?;
        Ok::<_, JuniorError>(session.run().await)
    });
    let final_state = session.state().to_string();
    let ticks = session.ticks();
    // Restores the terminal when the keyboard owned it.
    drop(session);

    match outcome {
        Ok(reason) => {
            println!();
            println!("  {} {:?} after {} ticks", "Stopped:".bold(), reason, ticks);
            println!("  {}", final_state.dimmed());
        }
        Err(e) => println!("{}: {}", "Connect failed".red(), e),
    }
}

fn cmd_snapshot(rt: &Runtime, resolution: Resolution, path: Option<PathBuf>) {
    let cfg = load_config_or_default();
    let path = path.unwrap_or_else(|| PathBuf::from(format!("snapshot-{resolution}.jpg")));

    let result = HttpCamera::new(&cfg.http)
        .and_then(|camera| rt.block_on(camera.fetch_frame(resolution)))
        .and_then(|frame| {
            std::fs::write(&path, &frame.jpeg)
                .map(|_| frame.len())
                .map_err(|e| JuniorError::Config(format!("write {}: {e}", path.display())))
        });

    match result {
        Ok(len) => println!(
            "{} {} ({} bytes)",
            "✓ Saved".green(),
            path.display().to_string().bold(),
            len
        ),
        Err(e) => println!("{}: {}", "Snapshot failed".red(), e),
    }
}

fn cmd_record(rt: &Runtime, count: usize, dir: PathBuf) {
    let cfg = load_config_or_default();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        println!("{}: {}", "Cannot create directory".red(), e);
        return;
    }

    let frames = match HttpCamera::new(&cfg.http).and_then(|c| rt.block_on(c.mjpeg_frames(count))) {
        Ok(f) => f,
        Err(e) => {
            println!("{}: {}", "Recording failed".red(), e);
            return;
        }
    };

    let mut saved = 0usize;
    for (i, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("frame-{i:05}.jpg"));
        match std::fs::write(&path, &frame.jpeg) {
            Ok(()) => saved += 1,
            Err(e) => {
                println!("{}: {}: {}", "Write failed".red(), path.display(), e);
                break;
            }
        }
    }
    println!(
        "{} {} of {} frame(s) to {}",
        "✓ Saved".green(),
        saved,
        count,
        dir.display().to_string().bold()
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_config_or_default() -> Config {
    match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {} – using defaults", "Config error".red(), e);
            Config::default()
        }
    }
}

/// Prompt for a u16 value.  Returns `default` when the user presses Enter.
fn prompt_u16(msg: &str, default: u16) -> u16 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<u16>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not a valid port number, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_commands_parse() {
        assert_eq!(parse_command("/drive\n"), Ok(Command::Drive));
        assert_eq!(parse_command("  /scan "), Ok(Command::Scan));
        assert_eq!(parse_command("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn snapshot_defaults_to_low_resolution() {
        assert_eq!(
            parse_command("/snapshot"),
            Ok(Command::Snapshot {
                resolution: Resolution::Lo,
                path: None
            })
        );
        assert_eq!(
            parse_command("/snapshot hi front.jpg"),
            Ok(Command::Snapshot {
                resolution: Resolution::Hi,
                path: Some(PathBuf::from("front.jpg"))
            })
        );
    }

    #[test]
    fn snapshot_rejects_unknown_resolution() {
        assert!(parse_command("/snapshot 4k").is_err());
    }

    #[test]
    fn record_needs_positive_count() {
        assert_eq!(
            parse_command("/record 30"),
            Ok(Command::Record {
                count: 30,
                dir: PathBuf::from(DEFAULT_RECORD_DIR)
            })
        );
        assert!(parse_command("/record").is_err());
        assert!(parse_command("/record 0").is_err());
        assert!(parse_command("/record many").is_err());
    }

    #[test]
    fn extra_arguments_are_rejected() {
        assert!(parse_command("/drive now").is_err());
        assert!(parse_command("/record 3 out extra").is_err());
    }

    #[test]
    fn unknown_command_is_reported() {
        let err = parse_command("/fly").unwrap_err();
        assert!(err.contains("/fly"));
    }
}
