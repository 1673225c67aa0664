//! CLI entry point for mux-control
//!
//! Opens a session to the control board, runs one command and closes the
//! session again (which opens every switch on the discovered substrates).
//!
//! ```bash
//! mux-control --address 10.42.0.54:23 info
//! mux-control --address 10.42.0.54:23 select A 3
//! mux-control --address 10.42.0.54:23 adc 0
//! mux-control --address 10.42.0.54:23 query v
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mux_control::config::{MuxConfig, DEFAULT_CONFIG_PATH};
use mux_control::logging::{self, LoggingConfig, OutputFormat};
use mux_control::{MuxSession, Substrate};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mux-control")]
#[command(about = "Talk to the pixel multiplexer control board", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Board address (host:port), overrides the config file
    #[arg(long, global = true)]
    address: Option<String>,

    /// Don't read adapter calibration resistors during discovery
    #[arg(long, global = true)]
    skip_resistors: bool,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print firmware identity, discovered substrates and adapters
    Info,

    /// Read raw counts from an ADC channel (0-7)
    Adc { channel: u8 },

    /// Select a pixel on a substrate (pixel 0 opens all switches)
    Select { substrate: char, pixel: u8 },

    /// Send a raw command and print the reply
    Query { command: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MuxConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(address) = &cli.address {
        config.board.address = Some(address.clone());
    }
    if cli.skip_resistors {
        config.board.ignore_adapter_resistors = true;
    }
    config.validate()?;

    let mut logging_config = LoggingConfig::from_config(&config).map_err(|e| anyhow!(e))?;
    if let Some(format) = cli.log_format {
        logging_config = logging_config.with_format(format);
    }
    logging::init(logging_config).map_err(|e| anyhow!(e))?;

    let address = config
        .board
        .address
        .clone()
        .ok_or_else(|| anyhow!("No board address; pass --address or set board.address"))?;

    let session = MuxSession::open(&address, config.session_options())
        .await
        .with_context(|| format!("Failed to open control board at {address}"))?;

    let result = run(&session, cli.command).await;
    session.close().await;
    result
}

async fn run(session: &MuxSession, command: Commands) -> Result<()> {
    match command {
        Commands::Info => {
            println!("Firmware:   {}", session.identity());
            let substrates = session.substrates();
            if substrates.is_empty() {
                println!("Substrates: none");
            } else {
                println!(
                    "Substrates: {} (mask {:#010b})",
                    substrates.letters(),
                    substrates.bits()
                );
            }
            for adapter in session.adapters() {
                println!("  {}: resistor {}", adapter.substrate, adapter.resistor);
            }
        }
        Commands::Adc { channel } => {
            let counts = session.read_adc_channel(channel).await?;
            println!("ADC{channel}: {counts}");
        }
        Commands::Select { substrate, pixel } => {
            let substrate = Substrate::from_letter(substrate)?;
            if !session.select_pixel(substrate, pixel).await? {
                return Err(anyhow!("Board did not confirm selecting {substrate}{pixel}"));
            }
            println!("Selected {substrate}{pixel}");
        }
        Commands::Query { command } => {
            let frame = session.query(&command).await?;
            match frame.fault() {
                None => println!("{}", frame.text),
                Some(fault) => return Err(anyhow!("'{command}' failed: {fault}")),
            }
        }
    }
    Ok(())
}
