use crate::error::{Error, Result};
use crate::pool::PoolInner;
use crate::pool::entry::{ConnectAttempt, Entry};
use crate::pool::worker;
use crate::transport::Connector;
use futures::FutureExt;
use std::sync::Arc;
use tokio::time::timeout;

impl<C: Connector> PoolInner<C> {
    /// Start a connect attempt, or join the one already in flight.
    pub(crate) fn connect(self: &Arc<Self>, entry: &Arc<Entry<C::Transport>>) -> ConnectAttempt {
        let mut state = entry.lock_state();
        if let Some(attempt) = &state.connecting {
            return attempt.clone();
        }
        if state.connected {
            return futures::future::ready(Ok(())).boxed().shared();
        }
        if let Some(reason) = &state.closed {
            return futures::future::ready(Err(reason.clone())).boxed().shared();
        }

        let task = tokio::spawn(Arc::clone(self).dial(Arc::clone(entry)));
        let attempt = async move { task.await.unwrap_or(Err(Error::ConnectionClosed)) }
            .boxed()
            .shared();
        state.connecting = Some(attempt.clone());
        attempt
    }

    async fn dial(self: Arc<Self>, entry: Arc<Entry<C::Transport>>) -> Result<()> {
        let key = &entry.key;
        let connect_timeout = self.config.connect_timeout();
        tracing::debug!("Connecting to {}", key);

        let result = tokio::select! {
            _ = entry.cancel.cancelled() => {
                return Err(entry.lock_state().closed.clone().unwrap_or(Error::ConnectionClosed));
            }
            result = timeout(connect_timeout, self.connector.connect(&key.host, key.port)) => {
                result
            }
        };

        let err = match result {
            Ok(Ok(transport)) => {
                let mut state = entry.lock_state();
                state.connecting = None;
                if let Some(reason) = &state.closed {
                    return Err(reason.clone());
                }
                state.connected = true;
                drop(state);
                tracing::info!("Connected to {}", key);
                tokio::spawn(worker::run(Arc::clone(&self), Arc::clone(&entry), transport));
                return Ok(());
            }
            Ok(Err(err)) => err.into_connect_error(key.to_string()),
            Err(_) => Error::ConnectTimeout(key.to_string()),
        };

        entry.lock_state().connecting = None;
        tracing::warn!("Connection to {} failed: {}", key, err);
        self.schedule_reconnect(&entry);
        Err(err)
    }

    /// Retry after the fixed delay, but only while someone still holds a
    /// reference and nothing else is already trying.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>, entry: &Arc<Entry<C::Transport>>) {
        {
            let mut state = entry.lock_state();
            if state.ref_count == 0
                || state.reconnect_pending
                || state.connecting.is_some()
                || state.closed.is_some()
            {
                return;
            }
            state.reconnect_pending = true;
        }

        let delay = self.config.reconnect_delay();
        tracing::info!("Reconnecting to {} in {:?}", entry.key, delay);

        let pool = Arc::clone(self);
        let entry = Arc::clone(entry);
        tokio::spawn(async move {
            tokio::select! {
                _ = entry.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let attempt = {
                let mut state = entry.lock_state();
                state.reconnect_pending = false;
                if state.ref_count == 0 || state.connected {
                    return;
                }
                drop(state);
                pool.connect(&entry)
            };
            if let Err(e) = attempt.await {
                tracing::debug!("Reconnect to {} failed: {}", entry.key, e);
            }
        });
    }

    /// The transport went away, mid-request or while idle: fail everything
    /// queued and schedule a reconnect.
    pub(crate) fn handle_close(self: &Arc<Self>, entry: &Arc<Entry<C::Transport>>, cause: &Error) {
        let queue = {
            let mut state = entry.lock_state();
            state.connected = false;
            state.connecting = None;
            std::mem::take(&mut state.queue)
        };

        tracing::warn!("Connection to {} closed: {}", entry.key, cause);
        for op in queue {
            op.reject(Error::ConnectionClosed);
        }

        self.schedule_reconnect(entry);
    }
}
