#[path = "../bin_common.rs"]
mod common;

use clap::Parser;
use common::{parse_address, parse_range, print_device, print_reading};
use gateway_poller::{
    ConnectionPool, DEFAULT_PORT, DeviceCategory, DeviceModelConfig, DiscoverySettings,
    ModelRegistry, PoolConfig,
};
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gateway-poll")]
#[command(about = "Poll devices behind a Modbus/TCP gateway over a pooled connection")]
struct Args {
    /// Gateway host name or IP address
    #[arg(long)]
    host: String,

    /// Gateway TCP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Unit ids to poll (repeatable). Discovers devices when omitted.
    #[arg(short, long, value_parser = parse_address)]
    unit: Vec<u8>,

    /// Unit id ranges to scan when discovering, e.g. 100-199
    #[arg(short, long, value_parser = parse_range)]
    range: Vec<RangeInclusive<u8>>,

    /// Polling interval in seconds (minimum 1)
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,

    /// Switch the output of every I/O module on before polling
    #[arg(long, conflicts_with = "output_off")]
    output_on: bool,

    /// Switch the output of every I/O module off before polling
    #[arg(long)]
    output_off: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();
    let poll_interval = Duration::from_secs(args.poll_interval.max(1));

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        cancel_signal.cancel();
    });

    let pool = ConnectionPool::tcp(PoolConfig::default());
    let registry = ModelRegistry::builtin();

    let result = run(&pool, &registry, &args, poll_interval, cancel).await;

    pool.release(&args.host, args.port);
    pool.destroy();
    tracing::info!("Shutdown complete");
    result
}

async fn run(
    pool: &ConnectionPool,
    registry: &ModelRegistry,
    args: &Args,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let (host, port) = (args.host.as_str(), args.port);

    tracing::info!("Connecting to {}:{}...", host, port);
    pool.acquire(host, port).await?;

    let devices = if args.unit.is_empty() {
        let settings = if args.range.is_empty() {
            DiscoverySettings::default()
        } else {
            DiscoverySettings::with_ranges(args.range.clone())
        };
        let found = pool.discover(registry, host, port, &settings).await?;
        let mut devices = Vec::new();
        for device in found {
            print_device(&device);
            if let Some(model) = registry.get(device.store.type_code) {
                devices.push((device.id.unit_id, model.clone()));
            }
        }
        devices
    } else {
        identify_units(pool, registry, host, port, &args.unit).await
    };

    if devices.is_empty() {
        return Err("No devices to poll".into());
    }

    if args.output_on || args.output_off {
        for (unit_id, model) in &devices {
            if model.category != DeviceCategory::DigitalInputOutput {
                continue;
            }
            match pool.set_output(host, port, *unit_id, args.output_on).await {
                Ok(()) => tracing::info!(
                    "Unit {}: output {}",
                    unit_id,
                    if args.output_on { "on" } else { "off" }
                ),
                Err(e) => tracing::warn!("Unit {}: output command failed: {}", unit_id, e),
            }
        }
    }

    tracing::info!("Polling {} device(s) every {:?}", devices.len(), poll_interval);
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => {
                tracing::info!("Poller stopping");
                return Ok(());
            }
        }

        for (unit_id, model) in &devices {
            match pool.poll(host, port, *unit_id, model).await {
                Ok(reading) => print_reading(*unit_id, &reading),
                Err(e) => tracing::warn!("Failed to poll unit {}: {}", unit_id, e),
            }
        }
    }
}

async fn identify_units(
    pool: &ConnectionPool,
    registry: &ModelRegistry,
    host: &str,
    port: u16,
    units: &[u8],
) -> Vec<(u8, DeviceModelConfig)> {
    let mut devices = Vec::new();
    for &unit_id in units {
        match pool.identify(host, port, unit_id).await {
            Ok(id) => match registry.get(id.type_code) {
                Some(model) => {
                    tracing::info!("Unit {}: {} ({})", unit_id, id.name, model.name);
                    devices.push((unit_id, model.clone()));
                }
                None => tracing::warn!("Unit {}: unknown device type {}", unit_id, id.type_code),
            },
            Err(e) => tracing::warn!("Unit {}: {}", unit_id, e),
        }
    }
    devices
}
