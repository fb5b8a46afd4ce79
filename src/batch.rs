//! Media-group debounce buffer.
//!
//! A multi-file upload arrives as N separate attachment events sharing a
//! group id. Each arrival cancels and reschedules a quiet-period timer for
//! its (actor, group) key; when a timer finally fires unreset, exactly one
//! completion is emitted reporting the accumulated count. The window is
//! open-ended: it closes only after a quiet period, not at a fixed count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::models::ActorId;

/// Emitted once per media group after the quiet period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuiet {
    pub actor: ActorId,
    pub group: String,
    pub count: usize,
}

type BatchKey = (ActorId, String);

struct PendingBatch {
    count: usize,
    /// Stamp distinguishing the live timer from an already-aborted one.
    generation: u64,
    timer: JoinHandle<()>,
}

/// Debounce state for all in-flight media groups.
pub struct MediaGroupBuffer {
    window: Duration,
    quiet_tx: UnboundedSender<BatchQuiet>,
    pending: Arc<Mutex<HashMap<BatchKey, PendingBatch>>>,
}

impl MediaGroupBuffer {
    pub fn new(window: Duration, quiet_tx: UnboundedSender<BatchQuiet>) -> Self {
        Self {
            window,
            quiet_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record one attachment of a media group: bump the count, cancel the
    /// previous timer, and schedule a fresh one.
    pub fn note(&self, actor: ActorId, group: &str) {
        let key: BatchKey = (actor, group.to_string());
        let mut map = self.pending.lock().unwrap();

        let (count, generation) = match map.remove(&key) {
            Some(previous) => {
                previous.timer.abort();
                (previous.count + 1, previous.generation + 1)
            }
            None => (1, 0),
        };

        let pending = Arc::clone(&self.pending);
        let quiet_tx = self.quiet_tx.clone();
        let window = self.window;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let finished = {
                let mut map = pending.lock().unwrap();
                // A racing `note` may have replaced the entry between this
                // timer's wakeup and its abort; only the live generation
                // may consume the batch.
                match map.get(&timer_key) {
                    Some(entry) if entry.generation == generation => map.remove(&timer_key),
                    _ => None,
                }
            };
            if let Some(batch) = finished {
                let _ = quiet_tx.send(BatchQuiet {
                    actor: timer_key.0,
                    group: timer_key.1,
                    count: batch.count,
                });
            }
        });

        map.insert(
            key,
            PendingBatch {
                count,
                generation,
                timer,
            },
        );
    }

    /// Drop all pending groups for an actor, cancelling their timers.
    /// Called when the actor's session is cancelled.
    pub fn clear_actor(&self, actor: ActorId) {
        let mut map = self.pending.lock().unwrap();
        map.retain(|(owner, _), entry| {
            if *owner == actor {
                entry.timer.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
