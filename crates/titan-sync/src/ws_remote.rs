//! # WebSocket Remote
//!
//! [`RemoteSystem`] implementation on top of the reconnecting [`Transport`].
//!
//! ```text
//! push(item)
//!    │  request_id = uuid
//!    │  pending[request_id] = oneshot
//!    ▼
//! Transport ──► Push ──────────────► hub
//!                                     │
//! router task ◄── PushAccepted ───────┘
//!    │           PushConflict
//!    │           PushRejected
//!    ▼
//! pending.remove(request_id).send(answer) ──► push() returns
//! ```
//!
//! A push made while disconnected fails fast with
//! [`RemoteError::Unavailable`]; a push with no answer inside the request
//! timeout fails with [`RemoteError::Timeout`]. Both are transient.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use titan_core::SyncItem;

use crate::protocol::SyncMessage;
use crate::remote::{RemoteAck, RemoteError, RemoteSystem};
use crate::transport::{ConnectionState, Transport, TransportConfig, TransportHandle};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<SyncMessage>>>>;

/// Remote system reached through the sync hub's WebSocket endpoint.
pub struct WsRemote {
    transport: TransportHandle,
    pending: PendingMap,
    request_timeout: Duration,
}

impl WsRemote {
    /// Spawns the transport and the answer router.
    pub fn connect(config: TransportConfig, request_timeout: Duration) -> Self {
        let (transport, incoming) = Transport::spawn(config);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(route_answers(incoming, pending.clone()));

        WsRemote {
            transport,
            pending,
            request_timeout,
        }
    }

    /// Connection state feed, suitable for `SyncEngine::follow_connectivity`.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Closes the connection and stops reconnecting.
    pub async fn shutdown(&self) {
        if let Err(e) = self.transport.shutdown().await {
            debug!(?e, "Transport already stopped");
        }
        self.pending.lock().await.clear();
    }
}

/// Hands each answer to the push waiting for it.
async fn route_answers(mut incoming: mpsc::Receiver<SyncMessage>, pending: PendingMap) {
    while let Some(message) = incoming.recv().await {
        match message {
            SyncMessage::Welcome(welcome) => {
                info!(hub = %welcome.hub_device_id, server_time = %welcome.server_time, "Hub accepted handshake");
            }
            SyncMessage::Error { code, message } => {
                warn!(%code, %message, "Hub reported an error");
            }
            SyncMessage::Pong { .. } => {}
            answer => {
                let Some(request_id) = answer.request_id().map(str::to_owned) else {
                    debug!(msg_type = %answer.type_name(), "Ignoring unsolicited message");
                    continue;
                };
                match pending.lock().await.remove(&request_id) {
                    Some(waiter) => {
                        // The waiter may have timed out already
                        let _ = waiter.send(answer);
                    }
                    None => debug!(%request_id, "Answer for unknown or expired request"),
                }
            }
        }
    }
    debug!("Answer router stopped");
}

#[async_trait]
impl RemoteSystem for WsRemote {
    async fn push(&self, item: &SyncItem) -> Result<RemoteAck, RemoteError> {
        if !self.transport.is_connected() {
            return Err(RemoteError::Unavailable("not connected to sync hub".into()));
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(e) = self.transport.send(SyncMessage::push(&request_id, item)).await {
            self.pending.lock().await.remove(&request_id);
            return Err(RemoteError::Unavailable(e.to_string()));
        }

        let answer = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => {
                return Err(RemoteError::Unavailable("connection closed before answer".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                return Err(RemoteError::Timeout(self.request_timeout.as_millis() as u64));
            }
        };

        match answer {
            SyncMessage::PushAccepted { remote_version, .. } => {
                Ok(RemoteAck::Accepted { remote_version })
            }
            SyncMessage::PushConflict { remote, .. } => Ok(RemoteAck::Conflict(remote)),
            SyncMessage::PushRejected {
                reason, retryable, ..
            } => {
                if retryable {
                    Err(RemoteError::Unavailable(reason))
                } else {
                    Err(RemoteError::Rejected(reason))
                }
            }
            other => Err(RemoteError::Rejected(format!(
                "unexpected answer {}",
                other.type_name()
            ))),
        }
    }
}
