use crate::error::Error;
use crate::pool::PoolInner;
use crate::pool::entry::{Entry, QueuedOperation};
use crate::transport::{Connector, Transport};
use std::sync::Arc;
use tokio::time::timeout;

/// Owns one gateway connection from connect until it goes away.
///
/// Drains the queue one operation at a time, oldest first. With the queue
/// empty it waits for new work while watching the transport, so a gateway
/// closing an idle connection is handled right away instead of on the next
/// request. A timed-out operation is dropped and only that caller sees
/// `OperationTimeout`; the worker carries on with the next one.
pub(crate) async fn run<C: Connector>(
    pool: Arc<PoolInner<C>>,
    entry: Arc<Entry<C::Transport>>,
    mut transport: C::Transport,
) {
    let op_timeout = pool.config.operation_timeout();

    loop {
        while let Some(QueuedOperation { unit_id, op, reply }) = next_operation(&entry) {
            tracing::trace!("Running operation for unit {} on {}", unit_id, entry.key);
            let outcome = tokio::select! {
                biased;
                _ = entry.cancel.cancelled() => {
                    let reason = entry
                        .lock_state()
                        .closed
                        .clone()
                        .unwrap_or(Error::ConnectionClosed);
                    let _ = reply.send(Err(reason));
                    return;
                }
                result = timeout(op_timeout, op(&mut transport, unit_id)) => result,
            };

            match outcome {
                Ok(Ok(value)) => {
                    let _ = reply.send(Ok(value));
                }
                Ok(Err(err)) if err.is_connection_lost() => {
                    let _ = reply.send(Err(Error::ConnectionClosed));
                    drop(transport);
                    pool.handle_close(&entry, &err);
                    return;
                }
                Ok(Err(err)) => {
                    tracing::debug!(
                        "Operation for unit {} on {} failed: {}",
                        unit_id,
                        entry.key,
                        err
                    );
                    let _ = reply.send(Err(err));
                }
                Err(_) => {
                    tracing::warn!(
                        "Operation for unit {} on {} timed out after {:?}",
                        unit_id,
                        entry.key,
                        op_timeout
                    );
                    let _ = reply.send(Err(Error::OperationTimeout));
                }
            }
        }

        // Queued work runs before a close that is already pending.
        let cause = tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => return,
            _ = entry.wake.notified() => continue,
            cause = transport.closed() => cause,
        };
        drop(transport);
        pool.handle_close(&entry, &cause);
        return;
    }
}

fn next_operation<T>(entry: &Entry<T>) -> Option<QueuedOperation<T>> {
    let mut state = entry.lock_state();
    if entry.is_closed() || !state.connected {
        return None;
    }
    state.queue.pop_front()
}
