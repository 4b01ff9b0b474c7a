//! Shared gateway connections.
//!
//! One transport per `(host, port)`, reference counted across callers. All
//! operations against a gateway go through a single FIFO queue, because the
//! bus behind it only ever answers one request at a time.

mod connect;
mod entry;
mod worker;

use crate::device::{DeviceModelConfig, OutputCommand};
use crate::error::{Error, Result};
use crate::query::{self, Identification};
use crate::readings::PollResult;
use crate::tcp::TcpConnector;
use crate::transport::Connector;
use entry::{AnyValue, Entry, QueuedOperation, boxed_operation};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Pool timing. Defaults are the values gateways are tuned for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_operation_timeout() -> u64 {
    5_000
}

fn default_reconnect_delay() -> u64 {
    30_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            operation_timeout_ms: default_operation_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayKey {
    pub host: String,
    pub port: u16,
}

impl GatewayKey {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for GatewayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub(crate) struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    entries: Mutex<HashMap<GatewayKey, Arc<Entry<C::Transport>>>>,
    destroyed: AtomicBool,
}

impl<C: Connector> PoolInner<C> {
    fn entries(&self) -> MutexGuard<'_, HashMap<GatewayKey, Arc<Entry<C::Transport>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, key: &GatewayKey) -> Option<Arc<Entry<C::Transport>>> {
        self.entries().get(key).cloned()
    }
}

/// Process-wide store of gateway connections.
///
/// Create one at startup, hand clones to whatever polls devices, and call
/// [`destroy`](Self::destroy) at shutdown.
pub struct ConnectionPool<C: Connector = TcpConnector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConnectionPool<TcpConnector> {
    pub fn tcp(config: PoolConfig) -> Self {
        Self::new(TcpConnector, config)
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                entries: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Take a reference on the gateway connection and wait until it is up.
    ///
    /// The reference is held even when this fails: the pool keeps retrying
    /// in the background until the matching [`release`](Self::release).
    pub async fn acquire(&self, host: &str, port: u16) -> Result<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(Error::ManagerDestroyed);
        }

        let key = GatewayKey::new(host, port);
        let entry = {
            let mut entries = self.inner.entries();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Entry::new(key.clone())));
            entry.lock_state().ref_count += 1;
            Arc::clone(entry)
        };

        let attempt = {
            let state = entry.lock_state();
            tracing::debug!("Acquired {} (refs: {})", key, state.ref_count);
            if state.connected {
                return Ok(());
            }
            drop(state);
            self.inner.connect(&entry)
        };
        attempt.await
    }

    /// Drop a reference. The last one closes the transport immediately.
    pub fn release(&self, host: &str, port: u16) {
        let key = GatewayKey::new(host, port);
        let entry = {
            let mut entries = self.inner.entries();
            let Some(entry) = entries.get(&key).cloned() else {
                return;
            };
            let mut state = entry.lock_state();
            state.ref_count = state.ref_count.saturating_sub(1);
            if state.ref_count > 0 {
                tracing::debug!("Released {} (refs: {})", key, state.ref_count);
                return;
            }
            drop(state);
            entries.remove(&key);
            entry
        };

        entry.shutdown(Error::ConnectionClosed);
        tracing::info!("Closed connection to {}", key);
    }

    /// Run `op` against the gateway's transport on behalf of `unit_id`.
    ///
    /// Operations on one gateway run strictly in submission order. The call
    /// waits for the connection if it is being re-established, and fails with
    /// `NotConnected` if the gateway was never acquired or cannot be reached.
    pub async fn execute<V, F>(&self, host: &str, port: u16, unit_id: u8, op: F) -> Result<V>
    where
        V: Send + 'static,
        F: for<'a> FnOnce(&'a mut C::Transport, u8) -> BoxFuture<'a, Result<V>> + Send + 'static,
    {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(Error::ManagerDestroyed);
        }

        let key = GatewayKey::new(host, port);
        let entry = self.inner.entry(&key).ok_or(Error::NotConnected)?;

        let connected = entry.lock_state().connected;
        if !connected {
            let attempt = self.inner.connect(&entry);
            if let Err(e) = attempt.await {
                tracing::debug!("{} unavailable for unit {}: {}", key, unit_id, e);
                return Err(Error::NotConnected);
            }
        }

        let op = boxed_operation(move |transport: &mut C::Transport, unit| {
            op(transport, unit)
                .map(|result| result.map(|value| Box::new(value) as AnyValue))
                .boxed()
        });
        let (reply, response) = oneshot::channel();

        {
            let mut state = entry.lock_state();
            if entry.is_closed() || !state.connected {
                return Err(Error::NotConnected);
            }
            state.queue.push_back(QueuedOperation { unit_id, op, reply });
        }
        entry.wake.notify_one();

        let value = response.await.map_err(|_| Error::ConnectionClosed)??;
        value
            .downcast::<V>()
            .map(|value| *value)
            .map_err(|_| Error::protocol("operation produced an unexpected value type"))
    }

    /// Read the category-specific measurements of one device.
    pub async fn poll(
        &self,
        host: &str,
        port: u16,
        unit_id: u8,
        model: &DeviceModelConfig,
    ) -> Result<PollResult> {
        let model = model.clone();
        self.execute(host, port, unit_id, move |transport, unit| {
            async move { query::poll(transport, unit, &model).await }.boxed()
        })
        .await
    }

    /// Switch a digital output.
    pub async fn set_output(&self, host: &str, port: u16, unit_id: u8, on: bool) -> Result<()> {
        let command = OutputCommand::from_state(on);
        self.execute(host, port, unit_id, move |transport, unit| {
            query::write_output(transport, unit, command).boxed()
        })
        .await
    }

    pub async fn identify(&self, host: &str, port: u16, unit_id: u8) -> Result<Identification> {
        self.execute(host, port, unit_id, |transport, unit| {
            query::identify(transport, unit).boxed()
        })
        .await
    }

    pub fn ref_count(&self, host: &str, port: u16) -> usize {
        self.inner
            .entry(&GatewayKey::new(host, port))
            .map_or(0, |entry| entry.lock_state().ref_count)
    }

    pub fn is_connected(&self, host: &str, port: u16) -> bool {
        self.inner
            .entry(&GatewayKey::new(host, port))
            .is_some_and(|entry| entry.lock_state().connected)
    }

    /// Number of gateways currently held.
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every connection and fail all pending operations with
    /// `ManagerDestroyed`. Meant for process shutdown.
    pub fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
        let entries: Vec<_> = self.inner.entries().drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            entry.shutdown(Error::ManagerDestroyed);
        }
        tracing::info!("Connection pool destroyed ({} connection(s))", entries.len());
    }
}
