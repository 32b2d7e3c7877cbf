//! snaptrap daemon.
//!
//! Wires the capture controller and gallery synchronizer together and
//! runs them in the foreground. Real deployments embed the library and
//! supply a vendor camera gateway plus platform trigger sources; this
//! binary substitutes the synthetic gateway and reads trigger commands
//! from stdin (`--simulate`), which makes the whole pipeline observable
//! without camera hardware.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, TimeZone};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use snaptrap::camera::sim::SimGateway;
use snaptrap::{CaptureController, Config, EnabledFlag, Gallery, LocalStore, TriggerEvent};

struct Args {
    config_path: Option<PathBuf>,
    simulate: bool,
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        config_path: None,
        simulate: false,
    };

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("snaptrap {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < argv.len() {
                    args.config_path = Some(PathBuf::from(&argv[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--simulate" | "-s" => {
                args.simulate = true;
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn print_help() {
    println!(
        r#"snaptrap - unlock-triggered intruder capture daemon

USAGE:
    snaptrap [OPTIONS]

OPTIONS:
    --simulate, -s      Run with the synthetic camera and stdin triggers
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SNAPTRAP_LOG        Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/snaptrap/config.toml

In simulate mode, one command per stdin line:
    unlocked    deliver an unlock trigger
    booted      deliver a boot trigger
    enable      enable captures (persisted)
    disable     disable captures (persisted)
    list        print the gallery, newest first
    quit        exit

Without --simulate there is no camera gateway to drive: embed the
library and supply a vendor gateway instead."#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let _ = snaptrap::logging::init(None);

    let config_path = args.config_path.unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;
    let enabled = EnabledFlag::new(&config, config_path);

    if !args.simulate {
        eprintln!("no camera gateway on this build; run with --simulate (see --help)");
        std::process::exit(1);
    }

    let store = Arc::new(LocalStore::open(&config.pictures_dir, &config.index_path)?);
    let gallery = Gallery::new(Arc::clone(&store), config.album.clone());
    gallery.reload().await;

    let gateway = Arc::new(SimGateway::new());
    let (trigger_tx, trigger_rx) = mpsc::channel(8);
    let controller = CaptureController::new(
        gateway,
        Arc::clone(&store),
        config.album.clone(),
        enabled.clone(),
        config.image_wait(),
    );
    let handle = controller.spawn(trigger_rx);

    info!(album = %config.album, pictures_dir = %config.pictures_dir.display(), "snaptrap running");
    println!("snaptrap simulate mode; commands: unlocked, booted, enable, disable, list, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "unlocked" => {
                let _ = trigger_tx.send(TriggerEvent::Unlocked).await;
            }
            "booted" => {
                let _ = trigger_tx.send(TriggerEvent::Booted).await;
            }
            "enable" => {
                enabled.set(true)?;
                println!("captures enabled");
            }
            "disable" => {
                enabled.set(false)?;
                println!("captures disabled");
            }
            "list" => {
                gallery.reload().await;
                let state = gallery.state().borrow().clone();
                if state.items.is_empty() {
                    println!("no captured photos");
                }
                for (i, photo) in state.items.iter().enumerate() {
                    let when = Local
                        .timestamp_millis_opt(photo.timestamp_ms)
                        .single()
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| photo.timestamp_ms.to_string());
                    println!("{i:3}  {}  {when}", photo.ref_);
                }
            }
            "quit" | "exit" => break,
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    drop(trigger_tx);
    handle.join().await;
    info!("snaptrap stopped");
    Ok(())
}
