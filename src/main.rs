// src/main.rs - Host runner: feeds the console into the machine and ticks it in real time
use brundle_rs::config::{self, Config};
use brundle_rs::hardware::{Clock, MonotonicClock};
use brundle_rs::machine::Machine;
use brundle_rs::storage::DirStore;
use clap::Parser;
use serial2_tokio::SerialPort;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// BrundleFab controller on simulated hardware
#[derive(Parser, Debug)]
#[command(name = "brundle-host", about = "Run the BrundleFab G-code controller against simulated axes.")]
struct Args {
    /// Path to a TOML config file (defaults to the built-in wiring)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory served to M20/M23/M32
    #[arg(long)]
    program_dir: Option<PathBuf>,

    /// Serial device for the console instead of stdin/stdout
    #[arg(long)]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

enum Console {
    Stdio,
    Serial(Arc<SerialPort>),
}

impl Console {
    async fn write(&self, text: &str) -> std::io::Result<()> {
        match self {
            Console::Stdio => {
                let mut out = tokio::io::stdout();
                out.write_all(text.as_bytes()).await?;
                out.flush().await
            }
            Console::Serial(port) => port.write_all(text.as_bytes()).await,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            config::load_config(&path.to_string_lossy())?
        }
        None => Config::default(),
    };
    if let Some(dir) = args.program_dir {
        config.storage.program_dir = dir;
    }
    if let Some(serial) = args.serial {
        config.console.serial = Some(serial);
    }
    if let Some(baud) = args.baud {
        config.console.baud = baud;
    }

    let store = DirStore::new(&config.storage.program_dir);
    let (mut machine, _parts) = Machine::simulated(&config, Box::new(store))?;
    tracing::info!("Programs served from {}", config.storage.program_dir.display());

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    let console = match &config.console.serial {
        Some(path) => {
            let port = Arc::new(SerialPort::open(path, config.console.baud)?);
            tracing::info!("Console on {} @ {} baud", path, config.console.baud);
            tokio::spawn(read_serial(port.clone(), tx));
            Console::Serial(port)
        }
        None => {
            tracing::info!("Console on stdin");
            tokio::spawn(read_stdin(tx));
            Console::Stdio
        }
    };

    let clock = MonotonicClock::new();
    let period = Duration::from_micros(config.machine.tick_us);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut input_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                machine.update(clock.now());
                let output = machine.take_output();
                if !output.is_empty() {
                    console.write(&output).await?;
                }
            }
            bytes = rx.recv(), if input_open => match bytes {
                Some(bytes) => machine.feed(&bytes),
                None => {
                    tracing::info!("Console closed");
                    input_open = false;
                }
            },
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, stopping motors");
                machine.stop();
                break;
            }
        }
        if !input_open && machine.console_backlog() == 0 && machine.gcode().is_idle() && !machine.cnc().motion_active() {
            tracing::info!("Input drained and machine idle, exiting");
            machine.stop();
            break;
        }
    }

    Ok(())
}

async fn read_stdin(tx: mpsc::Sender<Vec<u8>>) {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 256];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("stdin read failed: {}", e);
                break;
            }
        }
    }
}

async fn read_serial(port: Arc<SerialPort>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 256];
    loop {
        match port.read(&mut buf).await {
            Ok(0) => continue,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Serial read failed: {}", e);
                break;
            }
        }
    }
}
