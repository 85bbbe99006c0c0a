//! The duplex-channel sender side. At most one client is live at a time:
//! a new connection takes over the slot and the previous client's channel
//! closes, ending its socket task (last-connection-wins). There is no
//! back-pressure; the receiver is a singleton service worker.

use anyhow::{bail, Result};
use argus_core::{NotificationSink, PushEnvelope};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

struct ClientSlot {
    generation: u64,
    tx: mpsc::UnboundedSender<String>,
}

pub struct Broadcaster {
    slot: Mutex<Option<ClientSlot>>,
    generation: AtomicU64,
    delivered: AtomicU64,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Claim the client slot. Returns this connection's generation and the
    /// frame receiver; any previous client's receiver closes immediately.
    pub fn connect(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .slot
            .lock()
            .unwrap()
            .replace(ClientSlot { generation, tx });
        if previous.is_some() {
            tracing::info!("duplex client replaced (last-connection-wins)");
        }
        (generation, rx)
    }

    /// Release the slot, but only if it still belongs to this generation; a
    /// newer client keeps it.
    pub fn disconnect(&self, generation: u64) {
        let mut slot = self.slot.lock().unwrap();
        if slot.as_ref().map(|s| s.generation) == Some(generation) {
            *slot = None;
            tracing::info!("duplex client disconnected");
        }
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for Broadcaster {
    async fn send(&self, envelope: &PushEnvelope) -> Result<()> {
        let frame = serde_json::to_string(envelope)?;
        let slot = self.slot.lock().unwrap();
        match slot.as_ref() {
            Some(client) => {
                if client.tx.send(frame).is_err() {
                    bail!("duplex client channel closed");
                }
                self.delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => bail!("no duplex client connected"),
        }
    }

    fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| !s.tx.is_closed())
            .unwrap_or(false)
    }
}
