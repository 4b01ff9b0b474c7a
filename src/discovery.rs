//! Device discovery on a gateway.
//!
//! Walks a unit-id range over a dedicated connection, reads the device-type
//! register at each id and describes every recognised device. The
//! connection is never shared with the pool and is closed when the scan ends.

use crate::device::{Capabilities, DeviceModelConfig, ModelRegistry};
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::query;
use crate::transport::{Connector, Transport};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::timeout;

/// Where devices usually live: wireless devices are numbered from 100 up,
/// wired ones below that.
pub const PRIMARY_SCAN_RANGE: RangeInclusive<u8> = 100..=199;
pub const FALLBACK_SCAN_RANGE: RangeInclusive<u8> = 1..=99;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ScanPlan {
    /// Scan `primary`; scan `fallback` only if `primary` came up empty.
    Tiered {
        primary: RangeInclusive<u8>,
        fallback: RangeInclusive<u8>,
    },
    /// Scan every range in order.
    Ranges { ranges: Vec<RangeInclusive<u8>> },
}

impl Default for ScanPlan {
    fn default() -> Self {
        ScanPlan::Tiered {
            primary: PRIMARY_SCAN_RANGE,
            fallback: FALLBACK_SCAN_RANGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default)]
    pub plan: ScanPlan,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Pause between probes; the gateway's bus side is much slower than TCP.
    #[serde(default = "default_probe_delay")]
    pub probe_delay_ms: u64,
    /// Once something was found, this many timeouts in a row end the range.
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_probe_timeout() -> u64 {
    3_000
}

fn default_probe_delay() -> u64 {
    100
}

fn default_max_consecutive_timeouts() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            plan: ScanPlan::default(),
            probe_timeout_ms: default_probe_timeout(),
            probe_delay_ms: default_probe_delay(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl DiscoverySettings {
    pub fn with_ranges(ranges: Vec<RangeInclusive<u8>>) -> Self {
        Self {
            plan: ScanPlan::Ranges { ranges },
            ..Self::default()
        }
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentity {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

/// Connection settings a host application starts polling with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSettings {
    pub host: String,
    pub port: u16,
}

/// Fields a host application persists alongside the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStore {
    pub unit_id: u8,
    pub type_code: u16,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    pub name: String,
    pub id: DeviceIdentity,
    pub settings: DeviceSettings,
    pub store: DeviceStore,
    pub capabilities: Capabilities,
}

/// Scan one gateway for devices.
///
/// Fails only if the gateway cannot be reached; problems at individual unit
/// ids are logged and skipped.
pub async fn discover<C: Connector>(
    connector: &C,
    registry: &ModelRegistry,
    host: &str,
    port: u16,
    settings: &DiscoverySettings,
) -> Result<Vec<DiscoveredDevice>> {
    let connect = timeout(settings.connect_timeout(), connector.connect(host, port));
    let mut transport = match connect.await {
        Ok(Ok(transport)) => transport,
        Ok(Err(e)) => return Err(e.into_connect_error(format!("{host}:{port}"))),
        Err(_) => return Err(Error::ConnectTimeout(format!("{host}:{port}"))),
    };

    let mut scanner = Scanner {
        transport: &mut transport,
        registry,
        settings,
        host,
        port,
    };

    let devices = match &settings.plan {
        ScanPlan::Tiered { primary, fallback } => {
            let found = scanner.scan_range(primary.clone()).await;
            if found.is_empty() {
                tracing::info!(
                    "No devices in {:?} on {}:{}, trying {:?}",
                    primary,
                    host,
                    port,
                    fallback
                );
                scanner.scan_range(fallback.clone()).await
            } else {
                found
            }
        }
        ScanPlan::Ranges { ranges } => {
            let mut found = Vec::new();
            for range in ranges {
                found.extend(scanner.scan_range(range.clone()).await);
            }
            found
        }
    };

    tracing::info!("Found {} device(s) on {}:{}", devices.len(), host, port);
    Ok(devices)
}

struct Scanner<'a, T> {
    transport: &'a mut T,
    registry: &'a ModelRegistry,
    settings: &'a DiscoverySettings,
    host: &'a str,
    port: u16,
}

impl<T: Transport> Scanner<'_, T> {
    async fn scan_range(&mut self, range: RangeInclusive<u8>) -> Vec<DiscoveredDevice> {
        tracing::debug!("Scanning {}:{} units {:?}", self.host, self.port, range);
        let mut found = Vec::new();
        let mut consecutive_timeouts = 0u32;

        for (i, unit_id) in range.enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.probe_delay()).await;
            }

            let probe = timeout(
                self.settings.probe_timeout(),
                query::probe_device_type(&mut *self.transport, unit_id),
            )
            .await
            .unwrap_or(Err(Error::OperationTimeout));

            match probe {
                Ok(None) => {
                    consecutive_timeouts = 0;
                    tracing::trace!("Unit {} is empty", unit_id);
                }
                Ok(Some(type_code)) => {
                    consecutive_timeouts = 0;
                    match self.registry.get(type_code) {
                        Some(model) => {
                            let device = self.describe(unit_id, model).await;
                            tracing::info!("Found {} at unit {}", device.name, unit_id);
                            found.push(device);
                        }
                        None => {
                            tracing::warn!(
                                "Skipping unit {}: {}",
                                unit_id,
                                Error::UnknownDeviceType(type_code)
                            );
                        }
                    }
                }
                Err(e) if e.is_timeout() => {
                    consecutive_timeouts += 1;
                    tracing::debug!(
                        "Unit {} timed out ({} in a row)",
                        unit_id,
                        consecutive_timeouts
                    );
                }
                Err(e) => {
                    consecutive_timeouts = 0;
                    tracing::debug!("Unit {} did not answer: {}", unit_id, e);
                }
            }

            if !found.is_empty() && consecutive_timeouts > self.settings.max_consecutive_timeouts {
                tracing::info!(
                    "Stopping scan at unit {} after {} consecutive timeouts",
                    unit_id,
                    consecutive_timeouts
                );
                break;
            }
        }

        found
    }

    async fn describe(&mut self, unit_id: u8, model: &DeviceModelConfig) -> DiscoveredDevice {
        let fallback_name = format!("{} ({})", model.name, unit_id);
        let name = match timeout(
            self.settings.probe_timeout(),
            query::read_name(&mut *self.transport, unit_id),
        )
        .await
        {
            Ok(Ok(name)) if !name.is_empty() => name,
            Ok(Ok(_)) => fallback_name,
            Ok(Err(e)) => {
                tracing::debug!("Could not read name of unit {}: {}", unit_id, e);
                fallback_name
            }
            Err(_) => {
                tracing::debug!("Timed out reading name of unit {}", unit_id);
                fallback_name
            }
        };

        DiscoveredDevice {
            name,
            id: DeviceIdentity {
                host: self.host.to_string(),
                port: self.port,
                unit_id,
            },
            settings: DeviceSettings {
                host: self.host.to_string(),
                port: self.port,
            },
            store: DeviceStore {
                unit_id,
                type_code: model.type_code,
                model: model.model.clone(),
            },
            capabilities: model.capabilities(),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Discover devices over a transient connection made with this pool's
    /// connector. The pool's own connections are not touched.
    pub async fn discover(
        &self,
        registry: &ModelRegistry,
        host: &str,
        port: u16,
        settings: &DiscoverySettings,
    ) -> Result<Vec<DiscoveredDevice>> {
        discover(self.connector(), registry, host, port, settings).await
    }
}
