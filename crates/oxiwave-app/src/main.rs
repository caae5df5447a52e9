use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oxiwave_core::{ReadingLog, UartConfig, UartEvent, UartService};
use oxiwave_decode::PulseOximeter;
use serde::{Deserialize, Serialize};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Monitor a BerryMed pulse oximeter over a serial or transparent-UART bridge
#[derive(Parser)]
#[command(name = "oxiwave")]
struct Opts {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List candidate serial ports
    List,
    /// Stream readings from a device
    Watch {
        /// Serial port name; defaults to the last used port
        port: Option<String>,

        #[arg(long, default_value_t = 115_200)]
        baud: u32,

        /// Dump received bytes as hex instead of decoding
        #[arg(long)]
        raw: bool,

        /// Print readings as JSON lines
        #[arg(long, conflicts_with = "raw")]
        json: bool,

        /// Prefix each reading with a wall-clock timestamp
        #[arg(long)]
        timestamps: bool,

        /// Skip readings while the sensor reports invalid data
        #[arg(long)]
        skip_invalid: bool,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Settings {
    port: Option<String>,
    baud: Option<u32>,
}

impl Settings {
    fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("oxiwave").join("settings.json"))
    }

    fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn store(&self) {
        let Some(path) = Self::path() else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(text) = serde_json::to_string_pretty(self) {
            let _ = fs::write(path, text);
        }
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    match opts.command {
        Command::List => list_ports(),
        Command::Watch {
            port,
            baud,
            raw,
            json,
            timestamps,
            skip_invalid,
        } => watch(port, baud, raw, json, timestamps, skip_invalid),
    }
}

fn list_ports() -> Result<()> {
    let ports = UartService::list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
        return Ok(());
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {vid:04x}:{pid:04x}  {}",
                port.port_name,
                port.product.as_deref().unwrap_or("-")
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}

fn watch(
    port: Option<String>,
    baud: u32,
    raw: bool,
    json: bool,
    timestamps: bool,
    skip_invalid: bool,
) -> Result<()> {
    let mut settings = Settings::load();
    let port_name = port
        .or_else(|| settings.port.clone())
        .context("no port given and none remembered; run `oxiwave list` to find one")?;

    let service = UartService::open(UartConfig {
        port_name: port_name.clone(),
        baud_rate: baud,
    })?;

    settings.port = Some(port_name);
    settings.baud = Some(baud);
    settings.store();

    let rx = service.rx();
    let mut oximeter = PulseOximeter::new(rx.clone());
    let mut log = ReadingLog::new(1000);

    loop {
        while let Ok(event) = service.events().try_recv() {
            match event {
                UartEvent::Opened(name) => eprintln!("connected to {name}"),
                UartEvent::Error(e) => eprintln!("serial error: {e}"),
                UartEvent::Closed => {
                    eprintln!("port closed");
                    return Ok(());
                }
            }
        }

        if raw {
            let mut buf = [0u8; 256];
            loop {
                let n = rx.read(&mut buf);
                if n == 0 {
                    break;
                }
                println!("{}", hex::encode_upper(&buf[..n]));
            }
        } else {
            // A None may just be one dropped filler byte, so keep polling
            // while bytes remain; every attempt consumes at least one.
            while !oximeter.source().is_empty() {
                let Some(values) = oximeter.values() else {
                    continue;
                };
                if skip_invalid && !values.valid {
                    continue;
                }
                log.push(values);
                if json {
                    println!("{}", serde_json::to_string(&values)?);
                } else if let Some(reading) = log.latest() {
                    println!("{}", reading.to_line(timestamps));
                }
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}
