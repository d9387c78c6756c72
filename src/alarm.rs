use crate::error::FaultReason;
use crate::ports::{EventSink, RelayBank};
use crate::subsystems::RelayRole;
use crate::telemetry::EngineEvent;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use core::time::Duration;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Visual fault indicator on the light relay group.
///
/// Sequences never interleave. While one runs, at most one more waits
/// behind it; triggers arriving while a sequence is already waiting are
/// merged into it but still counted. After a sequence the light returns to
/// the state last requested through [`AlarmSignaler::set_light_wanted`].
#[derive(Clone)]
pub struct AlarmSignaler {
    relays: Arc<RelayBank>,
    sink: Arc<dyn EventSink>,
    flash_count: u32,
    toggle_interval: Duration,
    serial: Arc<Mutex<()>>,
    pending: Arc<AtomicBool>,
    light_wanted: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    sequences: Arc<AtomicU32>,
    flashes: Arc<AtomicU32>,
}

assert_impl_all!(AlarmSignaler: Send, Sync, Clone);

impl AlarmSignaler {
    pub fn new(
        relays: Arc<RelayBank>,
        sink: Arc<dyn EventSink>,
        flash_count: u32,
        toggle_interval: Duration,
    ) -> Self {
        Self {
            relays,
            sink,
            flash_count,
            toggle_interval,
            serial: Arc::new(Mutex::new(())),
            pending: Arc::new(AtomicBool::new(false)),
            light_wanted: Arc::new(AtomicBool::new(false)),
            halted: Arc::new(AtomicBool::new(false)),
            sequences: Arc::new(AtomicU32::new(0)),
            flashes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Start the configured flash sequence for a safety trip.
    pub fn trigger(&self, cause: FaultReason) -> Option<JoinHandle<()>> {
        self.sink.emit(&EngineEvent::Alarm {
            cause,
            flashes: self.flash_count,
        });
        self.flash(self.flash_count)
    }

    /// Toggle the light `times` times.
    ///
    /// Returns `None` when no light is configured or when the request was
    /// merged into a sequence that is already waiting to run.
    pub fn flash(&self, times: u32) -> Option<JoinHandle<()>> {
        self.sequences.fetch_add(1, Ordering::SeqCst);
        if !self.relays.groups().is_configured(RelayRole::Light) {
            error!("alarm requested but no light relay is configured");
            return None;
        }
        if self.pending.swap(true, Ordering::SeqCst) {
            debug!("alarm sequence already queued, request merged");
            return None;
        }

        let this = self.clone();
        Some(tokio::spawn(async move {
            let _turn = this.serial.lock().await;
            this.pending.store(false, Ordering::SeqCst);

            for _ in 0..times {
                if this.halted.load(Ordering::SeqCst) {
                    return;
                }
                this.write_light(true);
                tokio::time::sleep(this.toggle_interval).await;
                this.write_light(false);
                this.flashes.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(this.toggle_interval).await;
            }

            if this.light_wanted.load(Ordering::SeqCst) && !this.halted.load(Ordering::SeqCst) {
                this.write_light(true);
            }
        }))
    }

    /// Light state to return to once a sequence ends. Cleared by global off.
    pub fn set_light_wanted(&self, on: bool) {
        self.light_wanted.store(on, Ordering::SeqCst);
    }

    fn write_light(&self, on: bool) {
        if let Err(e) = self.relays.set_group(RelayRole::Light, on) {
            warn!(error = %e, "alarm light write failed");
        }
    }

    /// Stop every running and queued sequence. Used on shutdown.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Number of flash sequences requested so far.
    pub fn sequences(&self) -> u32 {
        self.sequences.load(Ordering::SeqCst)
    }

    /// Number of completed on/off flashes.
    pub fn flashes(&self) -> u32 {
        self.flashes.load(Ordering::SeqCst)
    }
}

impl core::fmt::Debug for AlarmSignaler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlarmSignaler")
            .field("flash_count", &self.flash_count)
            .field("toggle_interval", &self.toggle_interval)
            .field("sequences", &self.sequences())
            .finish_non_exhaustive()
    }
}
