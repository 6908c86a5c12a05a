use std::path::PathBuf;

use clap::Parser;
use core_types::Connector;
use device_link::{load_config, DeviceLink, LinkConfig, LinkError, LinkEvent, MockConnector};
use futures::StreamExt;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use transport_native::{available_ports, SerialConnector};

/// Forward classifier confidence values to the LED board
///
/// Reads one confidence per stdin line (`0.83` or `83`) and sends it framed
/// by BUSY/READY. Events from the board are printed to stdout.
#[derive(Parser, Debug)]
#[command(name = "device-link", version, long_about = None)]
struct Args {
    /// TOML configuration file (default: $DEVICE_LINK_CONFIG, else built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(short, long)]
    baud: Option<u32>,

    /// Use an in-memory device instead of a serial port
    #[arg(long, default_value_t = false)]
    mock: bool,

    /// List available serial ports and exit
    #[arg(long, default_value_t = false)]
    list_ports: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if args.list_ports {
        for port in available_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let mut config = load_config(args.config.as_deref())?;
    apply_cli_overrides(&mut config, &args);
    config.validate()?;

    if args.mock {
        let mock = MockConnector::new();
        run(config, mock.clone()).await?;
        for line in mock.written_lines() {
            println!("> {}", line);
        }
    } else {
        run(config, SerialConnector::new()).await?;
    }

    Ok(())
}

/// Command line flags win over file and environment settings
fn apply_cli_overrides(config: &mut LinkConfig, args: &Args) {
    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
}

async fn run<C: Connector>(config: LinkConfig, connector: C) -> Result<(), LinkError> {
    let link = DeviceLink::new(config, connector);

    let mut events = link.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            print_event(&event);
        }
    });

    let guard = link.connect_scoped().await?;
    info!("Reading confidence values from stdin, one per line");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => forward(&guard, &line),
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Interrupted, disconnecting");
                break;
            }
        }
    }

    guard.release().await;
    printer.abort();
    Ok(())
}

fn forward<C: Connector>(link: &DeviceLink<C>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let Some(confidence) = parse_confidence(line) else {
        warn!("Ignoring {:?}: not a confidence value", line);
        return;
    };

    let results = [
        link.set_status(true),
        link.set_confidence(confidence),
        link.set_status(false),
    ];
    if let Some(Err(e)) = results.into_iter().find(Result::is_err) {
        warn!("Confidence {} not forwarded: {}", line, e);
    }
}

/// `0.83` and `83` both mean 83%; values up to 1.0 are fractions and are
/// rounded to a whole percent.
fn parse_confidence(input: &str) -> Option<f64> {
    let value: f64 = input.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if value <= 1.0 {
        (value * 100.0).round()
    } else {
        value
    })
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::StyleChanged { index } => println!("style {}", index),
        LinkEvent::ConfirmPressed => println!("confirm"),
        LinkEvent::ConnectionChanged { connected: true } => println!("connected"),
        LinkEvent::ConnectionChanged { connected: false } => println!("disconnected"),
        LinkEvent::CommandTimedOut { command } => println!("timeout {}", command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confidence_fraction_and_percent() {
        assert_eq!(parse_confidence("0.83"), Some(83.0));
        assert_eq!(parse_confidence(" 83 "), Some(83.0));
        assert_eq!(parse_confidence("250"), Some(250.0));
        assert_eq!(parse_confidence("0.57"), Some(57.0));
        assert_eq!(parse_confidence("0"), Some(0.0));
    }

    #[test]
    fn test_parse_confidence_rejects_garbage() {
        assert_eq!(parse_confidence("high"), None);
        assert_eq!(parse_confidence("NaN"), None);
        assert_eq!(parse_confidence("inf"), None);
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from(["device-link", "--port", "/dev/ttyACM1", "-b", "115200"]);
        let mut config = LinkConfig::default();

        apply_cli_overrides(&mut config, &args);

        assert_eq!(config.port, "/dev/ttyACM1");
        assert_eq!(config.baud_rate, 115200);
        assert!(!args.mock);
    }
}
