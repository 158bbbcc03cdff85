//! Awaitable request/response client over the engine channels
//!
//! Each call allocates a fresh correlation id, registers a oneshot waiter,
//! sends the request, and awaits the reply under a timeout. Exactly one of
//! three things settles a request: the matching reply, the timeout, or a
//! `reset_all` sweep. A reply arriving after its waiter was removed is
//! dropped without effect, so a slow engine can never complete a request the
//! player already gave up on.

use crate::engine::protocol::{EngineOp, EngineReply, EngineRequest, RequestId, SessionId};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Client side of the engine protocol
pub struct EngineClient {
    request_tx: mpsc::UnboundedSender<EngineRequest>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Result<EngineReply>>>>,
    next_id: AtomicU64,
    default_timeout: Duration,
}

impl EngineClient {
    pub fn new(
        request_tx: mpsc::UnboundedSender<EngineRequest>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            request_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            default_timeout,
        }
    }

    /// Send an operation and await its reply under the default timeout
    pub async fn request(&self, session: SessionId, op: EngineOp) -> Result<EngineReply> {
        self.request_with_timeout(session, op, self.default_timeout)
            .await
    }

    /// Send an operation and await its reply under an explicit timeout
    pub async fn request_with_timeout(
        &self,
        session: SessionId,
        op: EngineOp,
        timeout: Duration,
    ) -> Result<EngineReply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let operation = op.name();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        trace!("Engine request {} ({}) sent", id, operation);
        if self
            .request_tx
            .send(EngineRequest { id, session, op })
            .is_err()
        {
            self.pending.lock().unwrap().remove(&id);
            return Err(Error::Canceled("decode engine is gone".into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // Waiter dropped by reset_all; the sweep already sent the
                // cancellation, this arm only fires if the sender was dropped
                // without a value.
                Err(Error::Canceled(format!("request '{operation}' abandoned")))
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                warn!("Engine request {} ({}) timed out", id, operation);
                Err(Error::Timeout { operation, timeout })
            }
        }
    }

    /// Settle a pending request with the engine's reply.
    ///
    /// Unknown ids (already timed out or reset) are ignored.
    pub fn complete(&self, id: RequestId, result: Result<EngineReply>) {
        let waiter = self.pending.lock().unwrap().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => trace!("Dropping reply for settled request {}", id),
        }
    }

    /// Cancel every pending request, settling each with `Canceled`.
    ///
    /// Used when the source is replaced or the player is destroyed.
    pub fn reset_all(&self, reason: &str) {
        let drained: Vec<_> = self.pending.lock().unwrap().drain().collect();
        if !drained.is_empty() {
            debug!("Canceling {} pending engine requests: {}", drained.len(), reason);
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(Error::Canceled(reason.to_string())));
        }
    }

    /// Number of requests awaiting a reply
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn client() -> (Arc<EngineClient>, mpsc::UnboundedReceiver<EngineRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(EngineClient::new(tx, Duration::from_millis(100))),
            rx,
        )
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let (client, mut rx) = client();

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(1, EngineOp::Pause).await })
        };

        let req = rx.recv().await.unwrap();
        assert_eq!(req.session, 1);
        client.complete(req.id, Ok(EngineReply::Ack));

        assert!(matches!(call.await.unwrap(), Ok(EngineReply::Ack)));
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_rejects_one_request() {
        let (client, mut rx) = client();

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(1, EngineOp::Seek { target_secs: 9.0 }).await })
        };

        let req = rx.recv().await.unwrap();
        client.complete(req.id, Err(Error::Protocol("bad frame".into())));

        assert!(matches!(call.await.unwrap(), Err(Error::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_request() {
        let (client, _rx) = client();

        let err = client.request(1, EngineOp::Resume).await.unwrap_err();
        match err {
            Error::Timeout { operation, timeout } => {
                assert_eq!(operation, "resume");
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_after_timeout_is_inert() {
        let (client, mut rx) = client();

        let result = client.request(1, EngineOp::Pause).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));

        // The reply shows up after the timeout; nothing must happen.
        let req = rx.recv().await.unwrap();
        client.complete(req.id, Ok(EngineReply::Ack));
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_reset_all_cancels_pending() {
        let (client, mut rx) = client();

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .request(
                        1,
                        EngineOp::ExportWav {
                            path: "out.wav".into(),
                        },
                    )
                    .await
            })
        };
        let req = rx.recv().await.unwrap();
        assert_eq!(client.pending_len(), 1);

        client.reset_all("source replaced");
        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());

        // A reply for the swept request is dropped.
        client.complete(req.id, Ok(EngineReply::Ack));
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_closed_engine_cancels_immediately() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let client = EngineClient::new(tx, Duration::from_secs(5));

        let err = client.request(1, EngineOp::Pause).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
