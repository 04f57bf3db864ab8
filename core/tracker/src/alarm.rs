//! One-shot midnight alarm driving the track split.

use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::service::ServiceEvent;

/// Longest single sleep. Waking periodically keeps the alarm honest across
/// suspend and wall-clock adjustments.
const POLL_SLICE: Duration = Duration::from_secs(30);

pub trait MidnightAlarm: Send {
    /// Replaces any pending alarm with one firing at `due`.
    fn arm(&mut self, due: DateTime<Local>);
    fn cancel(&mut self);
}

/// Alarm backed by a watcher thread that enqueues `ServiceEvent::Split`.
///
/// Each `arm`/`cancel` bumps a generation counter; a watcher whose generation
/// is stale exits without firing.
pub struct ThreadAlarm {
    events: Sender<ServiceEvent>,
    generation: Arc<AtomicU64>,
}

impl ThreadAlarm {
    pub fn new(events: Sender<ServiceEvent>) -> Self {
        Self {
            events,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl MidnightAlarm for ThreadAlarm {
    fn arm(&mut self, due: DateTime<Local>) {
        let armed = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let events = self.events.clone();

        let spawned = thread::Builder::new()
            .name("midnight-alarm".to_string())
            .spawn(move || loop {
                if generation.load(Ordering::SeqCst) != armed {
                    return;
                }
                let now = Local::now();
                if now >= due {
                    debug!(due = %due, "Midnight alarm fired");
                    let _ = events.send(ServiceEvent::Split { due });
                    return;
                }
                let remaining = (due - now).to_std().unwrap_or(Duration::ZERO);
                thread::sleep(remaining.min(POLL_SLICE));
            });

        if let Err(err) = spawned {
            warn!(error = %err, due = %due, "Failed to spawn midnight alarm thread");
        }
    }

    fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
