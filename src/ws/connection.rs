//! Per-connection outbound queue and shutdown signal

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

use crate::game::PlayerId;
use crate::ws::protocol::encode;

/// One-way shutdown flag shared by both pumps of a connection
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set (immediately if it already is)
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub-side handle used to route frames to one connection.
///
/// The hub holds the only sender; dropping the handle closes the
/// outbound queue once it has been flushed. A full queue closes the
/// connection rather than dropping frames.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: PlayerId,
    outbound: mpsc::Sender<String>,
    shutdown: Shutdown,
}

impl ConnectionHandle {
    /// Non-blocking enqueue of a text frame
    pub fn send(&self, frame: String) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(player_id = %self.id, "Outbound queue full, closing connection");
                self.close();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_msg<T: Serialize>(&self, msg: &T) -> bool {
        match encode(msg) {
            Ok(frame) => self.send(frame),
            Err(e) => {
                error!(player_id = %self.id, error = %e, "Failed to encode message");
                false
            }
        }
    }

    /// Ask both pumps to stop
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

/// A freshly accepted connection, split into the hub handle and the pump ends
pub struct Connection {
    pub handle: ConnectionHandle,
    pub outbound: mpsc::Receiver<String>,
    pub shutdown: Shutdown,
}

impl Connection {
    pub fn new(id: PlayerId, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = Shutdown::new();

        Self {
            handle: ConnectionHandle {
                id,
                outbound: tx,
                shutdown: shutdown.clone(),
            },
            outbound: rx,
            shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn overflow_closes_connection() {
        let Connection {
            handle,
            mut outbound,
            shutdown,
        } = Connection::new(Uuid::new_v4(), 2);

        assert!(handle.send("a".into()));
        assert!(handle.send("b".into()));
        assert!(!shutdown.is_triggered());

        assert!(!handle.send("c".into()));
        assert!(shutdown.is_triggered());
        assert!(handle.is_closed());

        // queued messages are untouched
        assert_eq!(outbound.try_recv().unwrap(), "a");
        assert_eq!(outbound.try_recv().unwrap(), "b");
    }

    #[test]
    fn send_to_finished_pump_fails_quietly() {
        let Connection {
            handle,
            outbound,
            shutdown,
        } = Connection::new(Uuid::new_v4(), 1);
        drop(outbound);

        assert!(!handle.send("a".into()));
        // a closed queue is not an overflow
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn dropping_handle_closes_queue_after_flush() {
        let Connection {
            handle,
            mut outbound,
            ..
        } = Connection::new(Uuid::new_v4(), 4);

        handle.send("last words".into());
        drop(handle);
        assert_eq!(outbound.try_recv().unwrap(), "last words");
        assert!(matches!(
            outbound.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_after_trigger() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finishes")
            .expect("task ok");

        // already triggered: resolves immediately
        tokio::time::timeout(Duration::from_millis(100), shutdown.wait())
            .await
            .expect("immediate");
    }
}
