//! Delivery guarantees layered over the raw transport.
//!
//! Three tiers by message criticality:
//! - best effort, single send: liveness probes, election chatter;
//! - group reliability: N repeated broadcasts with a small delay, for
//!   membership-critical announcements where the recipient set is unknown;
//! - point-to-point reliability: send, await an ack by message id, retry a
//!   bounded number of times. Every retry carries the same id, so the
//!   receiver's duplicate filter suppresses re-execution however many copies
//!   land.

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::transport::Transport;
use crate::wire::Frame;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use vmesh_core::{EventId, NodeId};

/// Send-side policy. Cheap to clone; the ack registry is shared.
pub struct Discipline<T> {
    transport: Arc<T>,
    pending_acks: Arc<Mutex<HashMap<EventId, oneshot::Sender<()>>>>,
}

impl<T> Clone for Discipline<T> {
    fn clone(&self) -> Self {
        Discipline {
            transport: Arc::clone(&self.transport),
            pending_acks: Arc::clone(&self.pending_acks),
        }
    }
}

impl<T: Transport> Discipline<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Discipline {
            transport,
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Single unreliable send to one peer.
    pub async fn best_effort_unicast(&self, to: NodeId, frame: &Frame) -> Result<(), KernelError> {
        let bytes = frame.encode()?;
        self.transport.send_unicast(to, bytes).await?;
        Ok(())
    }

    /// Single unreliable broadcast.
    pub async fn best_effort_group(&self, frame: &Frame) -> Result<(), KernelError> {
        let bytes = frame.encode()?;
        self.transport.send_group(bytes).await?;
        Ok(())
    }

    /// Repeat a broadcast `repeats` times with `delay` between sends.
    /// Receivers are expected to suppress the duplicates.
    pub async fn group_reliable(
        &self,
        frame: &Frame,
        repeats: u32,
        delay: Duration,
    ) -> Result<(), KernelError> {
        let bytes = frame.encode()?;
        for attempt in 0..repeats.max(1) {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }
            self.transport.send_group(bytes.clone()).await?;
        }
        Ok(())
    }

    /// Send to one peer and wait for its ack, retrying with the same bytes
    /// (and the same message id) until acked or out of attempts.
    pub async fn reliable_unicast(
        &self,
        to: NodeId,
        frame: &Frame,
        id: EventId,
        config: &KernelConfig,
    ) -> Result<(), KernelError> {
        let bytes = frame.encode()?;
        let (tx, mut rx) = oneshot::channel();
        self.pending_acks.lock().insert(id, tx);

        let attempts = config.retry_count.max(1);
        for attempt in 1..=attempts {
            trace!(%to, message = %id, attempt, "acked send attempt");
            if let Err(err) = self.transport.send_unicast(to, bytes.clone()).await {
                // The peer may come back within the retry window.
                debug!(%to, %err, "acked send attempt failed");
            }

            match tokio::time::timeout(config.retry_delay, &mut rx).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(_)) => break,
                Err(_) => continue,
            }
        }

        self.pending_acks.lock().remove(&id);
        Err(KernelError::AckTimeout { peer: to, attempts })
    }

    /// Resolve a pending acked send. Unknown ids are stale or duplicate acks
    /// and are ignored.
    pub fn acknowledge(&self, id: EventId) {
        if let Some(tx) = self.pending_acks.lock().remove(&id) {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn tiny_config() -> KernelConfig {
        KernelConfig::builder()
            .retry_count(3)
            .retry_delay(Duration::from_millis(20))
            .build()
    }

    #[tokio::test]
    async fn group_reliable_repeats_the_broadcast() {
        let a = MemoryTransport::new(NodeId(1));
        let b = MemoryTransport::new(NodeId(2));
        a.connect_to(&b);
        let mut inbox = b.subscribe();

        let discipline = Discipline::new(Arc::new(a));
        discipline
            .group_reliable(
                &Frame::Join { sender: NodeId(1) },
                3,
                Duration::from_millis(1),
            )
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(inbox.recv().await.is_some());
        }
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn acked_send_resolves_on_acknowledge() {
        let a = MemoryTransport::new(NodeId(1));
        let b = MemoryTransport::new(NodeId(2));
        a.connect_to(&b);
        let _inbox = b.subscribe();

        let discipline = Discipline::new(Arc::new(a));
        let id = EventId::generate();
        let frame = Frame::Ack {
            sender: NodeId(1),
            message_id: id,
        };

        let sender = discipline.clone();
        let handle = tokio::spawn(async move {
            sender
                .reliable_unicast(NodeId(2), &frame, id, &tiny_config())
                .await
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        discipline.acknowledge(id);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unacked_send_exhausts_retries() {
        let a = MemoryTransport::new(NodeId(1));
        let b = MemoryTransport::new(NodeId(2));
        a.connect_to(&b);
        let mut inbox = b.subscribe();

        let discipline = Discipline::new(Arc::new(a));
        let id = EventId::generate();
        let frame = Frame::Election { sender: NodeId(1) };

        let result = discipline
            .reliable_unicast(NodeId(2), &frame, id, &tiny_config())
            .await;
        assert!(matches!(
            result,
            Err(KernelError::AckTimeout { peer: NodeId(2), attempts: 3 })
        ));

        // All three attempts actually hit the wire.
        let mut seen = 0;
        while inbox.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn stale_ack_is_ignored() {
        let transport = MemoryTransport::new(NodeId(1));
        let discipline = Discipline::new(Arc::new(transport));
        discipline.acknowledge(EventId::generate());
    }
}
