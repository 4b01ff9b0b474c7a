use crate::error::{Error, Result};
use std::future::Future;

/// Register-level access to the devices behind one gateway connection.
///
/// Every call names its target unit explicitly, so one transport can be
/// shared by all devices on the gateway without any per-device state.
pub trait Transport: Send {
    /// Read `quantity` holding registers starting at `address`.
    fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = Result<Vec<u16>>> + Send;

    /// Write one holding register.
    fn write_single_register(
        &mut self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once the gateway has dropped the link, with the cause.
    ///
    /// Only polled while no request is outstanding. Dropping the future
    /// before it resolves must leave the transport usable.
    fn closed(&mut self) -> impl Future<Output = Error> + Send;
}

/// Opens transports to a gateway.
///
/// The pool and the discovery scanner only ever create transports through
/// this trait, which is what lets tests substitute a simulated gateway.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}
