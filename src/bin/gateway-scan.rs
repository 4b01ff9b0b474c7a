#[path = "../bin_common.rs"]
mod common;

use clap::Parser;
use common::{parse_range, print_device};
use gateway_poller::{
    DEFAULT_PORT, DiscoverySettings, FALLBACK_SCAN_RANGE, ModelRegistry, PRIMARY_SCAN_RANGE,
    ScanPlan, TcpConnector, discover,
};
use std::ops::RangeInclusive;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gateway-scan")]
#[command(about = "Discover devices behind a Modbus/TCP gateway")]
struct Args {
    /// Gateway host name or IP address
    #[arg(long)]
    host: String,

    /// Gateway TCP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Unit id ranges to scan, e.g. 100-199 (repeatable). Replaces the default plan.
    #[arg(short, long, value_parser = parse_range)]
    range: Vec<RangeInclusive<u8>>,

    /// Do not fall back to 1-99 when nothing answers in 100-199
    #[arg(long)]
    no_fallback: bool,

    /// Per-probe timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    probe_timeout: u64,

    /// Print devices as JSON lines instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();

    let plan = if !args.range.is_empty() {
        ScanPlan::Ranges { ranges: args.range }
    } else if args.no_fallback {
        ScanPlan::Ranges {
            ranges: vec![PRIMARY_SCAN_RANGE],
        }
    } else {
        ScanPlan::Tiered {
            primary: PRIMARY_SCAN_RANGE,
            fallback: FALLBACK_SCAN_RANGE,
        }
    };
    let settings = DiscoverySettings {
        plan,
        probe_timeout_ms: args.probe_timeout,
        ..DiscoverySettings::default()
    };

    let registry = ModelRegistry::builtin();
    tracing::info!("Scanning {}:{}...", args.host, args.port);
    let devices = discover(&TcpConnector, &registry, &args.host, args.port, &settings).await?;

    if devices.is_empty() {
        return Err(format!("No devices found on {}:{}", args.host, args.port).into());
    }

    for device in &devices {
        if args.json {
            println!("{}", serde_json::to_string(device)?);
        } else {
            print_device(device);
        }
    }

    Ok(())
}
