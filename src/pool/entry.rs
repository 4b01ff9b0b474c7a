use crate::error::{Error, Result};
use crate::pool::GatewayKey;
use futures::future::{BoxFuture, Shared};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

pub(crate) type AnyValue = Box<dyn Any + Send>;

/// A queued unit of work with its result type erased.
pub(crate) type Operation<T> =
    Box<dyn for<'a> FnOnce(&'a mut T, u8) -> BoxFuture<'a, Result<AnyValue>> + Send>;

/// The connect attempt every concurrent caller awaits.
pub(crate) type ConnectAttempt = Shared<BoxFuture<'static, Result<()>>>;

pub(crate) fn boxed_operation<T, F>(f: F) -> Operation<T>
where
    F: for<'a> FnOnce(&'a mut T, u8) -> BoxFuture<'a, Result<AnyValue>> + Send + 'static,
{
    Box::new(f)
}

pub(crate) struct QueuedOperation<T> {
    pub unit_id: u8,
    pub op: Operation<T>,
    pub reply: oneshot::Sender<Result<AnyValue>>,
}

impl<T> QueuedOperation<T> {
    pub fn reject(self, err: Error) {
        // The caller may have given up waiting; nothing to do then.
        let _ = self.reply.send(Err(err));
    }
}

pub(crate) struct EntryState<T> {
    pub ref_count: usize,
    pub connected: bool,
    pub connecting: Option<ConnectAttempt>,
    pub reconnect_pending: bool,
    pub queue: VecDeque<QueuedOperation<T>>,
    /// Why the entry was torn down; handed to whatever was still in flight.
    pub closed: Option<Error>,
}

/// Pooled connection to one gateway.
pub(crate) struct Entry<T> {
    pub key: GatewayKey,
    state: Mutex<EntryState<T>>,
    /// Cancelled exactly once, when the entry leaves the pool.
    pub cancel: CancellationToken,
    /// Tells the connection's worker that the queue has work.
    pub wake: Notify,
}

impl<T> Entry<T> {
    pub fn new(key: GatewayKey) -> Self {
        Self {
            key,
            state: Mutex::new(EntryState {
                ref_count: 0,
                connected: false,
                connecting: None,
                reconnect_pending: false,
                queue: VecDeque::new(),
                closed: None,
            }),
            cancel: CancellationToken::new(),
            wake: Notify::new(),
        }
    }

    pub fn lock_state(&self) -> MutexGuard<'_, EntryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the worker, which closes the transport, and fail everything
    /// still queued with `reason`. An operation already running gets the
    /// same error.
    pub fn shutdown(&self, reason: Error) {
        let queue = {
            let mut state = self.lock_state();
            state.connected = false;
            state.connecting = None;
            state.closed = Some(reason.clone());
            std::mem::take(&mut state.queue)
        };
        self.cancel.cancel();

        if !queue.is_empty() {
            tracing::debug!(
                "Rejecting {} queued operation(s) on {}: {}",
                queue.len(),
                self.key,
                reason
            );
        }
        for op in queue {
            op.reject(reason.clone());
        }
    }
}
