use airios_rs::logging::{init_logger, log_change, log_info, log_warn};
use airios_rs::protocol::frame;
use airios_rs::util::hex::decode_hex;
use airios_rs::{
    connect, Command, CommandRequest, Gateway, GatewayConfig, Preset, VentilationSpeed,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "airios-cli")]
#[command(about = "CLI tool for Airios RF bridge ventilation gateways")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Serial port, overrides the configuration
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    #[arg(long)]
    bridge_address: Option<u8>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll until interrupted, logging every change
    Run,
    /// Run one poll cycle and print the snapshot as JSON
    PollOnce,
    SetPreset {
        address: u8,
        #[arg(value_enum)]
        preset: PresetArg,
        supply: u8,
        exhaust: u8,
    },
    /// Temporary override at a preset
    PresetDuration {
        address: u8,
        #[arg(value_enum)]
        preset: PresetArg,
        minutes: u16,
    },
    VentilationSpeed {
        address: u8,
        #[arg(value_enum)]
        speed: SpeedArg,
    },
    FilterReset {
        address: u8,
    },
    DeviceReset {
        address: u8,
    },
    FactoryReset {
        address: u8,
    },
    BindController {
        node: u8,
        #[arg(value_parser = parse_u32)]
        product_id: u32,
        #[arg(long, value_parser = parse_u32)]
        rf_serial: Option<u32>,
    },
    BindAccessory {
        controller: u8,
        node: u8,
        #[arg(value_parser = parse_u32)]
        product_id: u32,
        #[arg(long, value_parser = parse_u32)]
        rf_serial: Option<u32>,
    },
    Unbind {
        node: u8,
    },
    /// Decode a captured frame given as hex
    DecodeFrame {
        hex: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PresetArg {
    Away,
    Low,
    Medium,
    High,
}

impl From<PresetArg> for Preset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Away => Preset::Away,
            PresetArg::Low => Preset::Low,
            PresetArg::Medium => Preset::Medium,
            PresetArg::High => Preset::High,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SpeedArg {
    Off,
    Low,
    Medium,
    High,
    Away,
    Boost,
    Auto,
}

impl From<SpeedArg> for VentilationSpeed {
    fn from(arg: SpeedArg) -> Self {
        match arg {
            SpeedArg::Off => VentilationSpeed::Off,
            SpeedArg::Low => VentilationSpeed::Low,
            SpeedArg::Medium => VentilationSpeed::Medium,
            SpeedArg::High => VentilationSpeed::High,
            SpeedArg::Away => VentilationSpeed::Away,
            SpeedArg::Boost => VentilationSpeed::Boost,
            SpeedArg::Auto => VentilationSpeed::Auto,
        }
    }
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn load_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(address) = cli.bridge_address {
        config.bridge_address = address;
    }
    config.normalize();
    Ok(config)
}

async fn submit(gateway: &Gateway, target: u8, command: Command) -> Result<()> {
    let name = command.name();
    let outcome = gateway
        .submit(CommandRequest::new(target, command))
        .await
        .with_context(|| format!("{name} for device {target}"))?;
    log_info(&format!(
        "{name} acknowledged by device {target} after {} attempt(s)",
        outcome.attempts
    ));
    Ok(())
}

async fn run(gateway: &Gateway) -> Result<()> {
    let cancel = CancellationToken::new();

    let mut changes = gateway.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => log_change(&change),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log_warn(&format!("Missed {n} state changes"));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log_info("Interrupted, stopping after the current request");
            interrupt.cancel();
        }
    });

    gateway.run(cancel).await;
    logger.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();

    if let Commands::DecodeFrame { hex } = &cli.command {
        let bytes = decode_hex(hex).context("parsing hex")?;
        let message = frame::decode(&bytes).context("decoding frame")?;
        println!("{message:#?}");
        return Ok(());
    }

    let config = load_config(&cli)?;
    let gateway = connect(config)
        .await
        .context("starting gateway")?;

    match cli.command {
        Commands::Run => run(&gateway).await?,
        Commands::PollOnce => {
            let report = gateway.poll_once().await;
            log_info(&format!(
                "Polled {} devices, {} readings, failed: {:?}",
                report.devices_polled, report.readings_updated, report.failed_devices
            ));
            println!("{}", serde_json::to_string_pretty(&gateway.snapshot())?);
        }
        Commands::SetPreset {
            address,
            preset,
            supply,
            exhaust,
        } => {
            let command = Command::SetPresetFanSpeed {
                preset: preset.into(),
                supply,
                exhaust,
            };
            submit(&gateway, address, command).await?;
        }
        Commands::PresetDuration {
            address,
            preset,
            minutes,
        } => {
            let command = Command::SetPresetModeDuration {
                preset: preset.into(),
                minutes,
            };
            submit(&gateway, address, command).await?;
        }
        Commands::VentilationSpeed { address, speed } => {
            let command = Command::SetVentilationSpeed {
                speed: speed.into(),
            };
            submit(&gateway, address, command).await?;
        }
        Commands::FilterReset { address } => {
            submit(&gateway, address, Command::FilterReset).await?
        }
        Commands::DeviceReset { address } => {
            submit(&gateway, address, Command::DeviceReset).await?
        }
        Commands::FactoryReset { address } => {
            submit(&gateway, address, Command::FactoryReset).await?
        }
        Commands::BindController {
            node,
            product_id,
            rf_serial,
        } => {
            let device = gateway.bind_controller(node, product_id, rf_serial).await?;
            println!("{}", serde_json::to_string_pretty(&device)?);
        }
        Commands::BindAccessory {
            controller,
            node,
            product_id,
            rf_serial,
        } => {
            let device = gateway
                .bind_accessory(controller, node, product_id, rf_serial)
                .await?;
            println!("{}", serde_json::to_string_pretty(&device)?);
        }
        Commands::Unbind { node } => {
            gateway.unbind(node).await?;
            log_info(&format!("Node {node} unbound"));
        }
        Commands::DecodeFrame { .. } => {}
    }

    Ok(())
}
