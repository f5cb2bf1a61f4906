use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;

use microlink_core::{list_ports, Direction, LinkConfig, MicrobitLink, Transcript};

#[derive(Parser, Debug)]
#[command(name = "microlink", version, about = "Serial console for micro:bit-class devices")]
struct Cli {
    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports visible on this machine.
    Ports,
    /// Send one line and print the device's reply.
    Send {
        /// Serial port, e.g. /dev/ttyACM0.
        port: String,
        /// Line to send.
        message: String,
        #[arg(long, default_value_t = 115_200)]
        baud: u32,
        /// Seconds to wait for the reply.
        #[arg(long, default_value_t = 2.0)]
        wait: f64,
    },
    /// Interactive console: stdin lines go to the device, frames print as
    /// they arrive.
    Console {
        /// Serial port, e.g. /dev/ttyACM0.
        port: String,
        #[arg(long, default_value_t = 115_200)]
        baud: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Command::Ports => cmd_ports(),
        Command::Send {
            port,
            message,
            baud,
            wait,
        } => cmd_send(&port, &message, baud, wait),
        Command::Console { port, baud } => cmd_console(&port, baud),
    }
}

fn init_logging(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

fn cmd_ports() -> Result<()> {
    let ports = list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
        return Ok(());
    }

    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => {
                let product = port.product.unwrap_or_default();
                println!("{} ({vid:04X}:{pid:04X}) {product}", port.name);
            }
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

fn cmd_send(port: &str, message: &str, baud: u32, wait: f64) -> Result<()> {
    ensure!(wait.is_finite() && wait >= 0.0, "wait must be a non-negative number of seconds");

    let link = MicrobitLink::new();
    link.connect_with(LinkConfig {
        port_name: port.to_string(),
        baud_rate: baud,
        ..Default::default()
    })
    .with_context(|| format!("opening {port}"))?;

    let reply = link.send_and_receive(message, Duration::from_secs_f64(wait))?;
    println!("{reply}");

    link.disconnect();
    Ok(())
}

fn cmd_console(port: &str, baud: u32) -> Result<()> {
    let link = MicrobitLink::new();
    let resolved = link
        .connect_with(LinkConfig {
            port_name: port.to_string(),
            baud_rate: baud,
            ..Default::default()
        })
        .with_context(|| format!("opening {port}"))?;
    eprintln!("connected to {resolved}; lines you type are sent, Ctrl-D quits");

    let transcript = Arc::new(Mutex::new(Transcript::new(1000)));

    {
        let transcript = transcript.clone();
        let started = link.start_listening(move |frame| {
            let line = transcript.lock().record(Direction::Rx, frame);
            println!("{line}");
        });
        ensure!(started, "failed to start the listener");
    }

    for line in io::stdin().lock().lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if link.send_text(text) {
            transcript.lock().record(Direction::Tx, text);
        } else {
            tracing::warn!("send failed; is the device still attached?");
        }
    }

    link.stop_listening();
    link.disconnect();

    let transcript = transcript.lock();
    if !transcript.is_empty() {
        eprintln!("--- session transcript ---");
        eprint!("{}", transcript.to_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "microlink",
            "send",
            "/dev/ttyACM0",
            "smile",
            "--wait",
            "0.5",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send {
                port,
                message,
                baud,
                wait,
            } => {
                assert_eq!(port, "/dev/ttyACM0");
                assert_eq!(message, "smile");
                assert_eq!(baud, 115_200);
                assert!((wait - 0.5).abs() < f64::EPSILON);
            }
            other => panic!("expected Send, got {other:?}"),
        }
    }

    #[test]
    fn parses_console_with_custom_baud() {
        let cli = Cli::try_parse_from(["microlink", "console", "/dev/ttyACM0", "--baud", "9600"])
            .expect("console args should parse");

        assert!(matches!(
            cli.command,
            Command::Console { baud: 9600, .. }
        ));
    }

    #[test]
    fn rejects_missing_port() {
        Cli::try_parse_from(["microlink", "send"]).expect_err("port and message are required");
    }
}
