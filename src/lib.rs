pub mod device;
pub mod discovery;
pub mod error;
pub mod pool;
pub mod query;
pub mod readings;
pub mod registers;
pub mod tcp;
pub mod transport;

pub use device::{
    Capabilities, DeviceCategory, DeviceModelConfig, ModelRegistry, OutputCommand, Phases,
    VoltageReference,
};
pub use discovery::{
    DiscoveredDevice, DiscoverySettings, FALLBACK_SCAN_RANGE, PRIMARY_SCAN_RANGE, ScanPlan,
    discover,
};
pub use error::{Error, Result};
pub use pool::{ConnectionPool, GatewayKey, PoolConfig};
pub use query::Identification;
pub use readings::{
    AlarmLevel, DigitalInputOutput, DigitalInputPair, EnergyReading, EnvironmentReading,
    PollResult,
};
pub use tcp::{DEFAULT_PORT, TcpConnector, TcpTransport};
pub use transport::{Connector, Transport};
