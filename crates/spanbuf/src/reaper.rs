//! Release of external resources keyed to marker reachability.
//!
//! Buffers and loaders that depend on an external resource (an open file, a
//! spill file awaiting deletion) hold a strong [`Marker`]. The [`Reaper`]
//! watches weak handles to those markers from a background thread: when the
//! last strong handle drops, the registered release action runs exactly
//! once. Failed releases are recorded on an observable list and never
//! propagated.

use crate::error::{BufferError, Result};
use crate::metrics::ReaperMetrics;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

static NEXT_MARKER_ID: AtomicU64 = AtomicU64::new(1);

const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// An opaque token whose unreachability triggers a registered release.
#[derive(Debug)]
pub struct Marker {
    id: u64,
}

impl Marker {
    /// A fresh marker. Hold the `Arc` from every object that needs the
    /// associated resource alive.
    pub fn new() -> Arc<Marker> {
        Arc::new(Marker {
            id: NEXT_MARKER_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    #[inline]
    fn id(&self) -> u64 {
        self.id
    }
}

type ReleaseAction = Box<dyn FnOnce() -> io::Result<()> + Send>;

struct Tracked {
    marker: Weak<Marker>,
    marker_id: u64,
    label: String,
    action: ReleaseAction,
}

#[derive(Default)]
struct ReaperState {
    tracked: Vec<Tracked>,
    failures: Vec<String>,
}

struct ReaperShared {
    state: Mutex<ReaperState>,
    wake: Condvar,
    closed: AtomicBool,
    metrics: ReaperMetrics,
}

impl ReaperShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, ReaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background cleaner for marker-keyed resources.
///
/// One reaper serves a whole factory. Registration is refused after
/// [`exit_when_finished`](Reaper::exit_when_finished); the sweep thread then
/// exits once the tracked set drains. Dropping the reaper releases whatever
/// is still tracked, reachable or not (the shutdown-hook behavior).
pub struct Reaper {
    shared: Arc<ReaperShared>,
    sweeper: Option<thread::JoinHandle<()>>,
}

impl Reaper {
    pub fn new() -> Self {
        let shared = Arc::new(ReaperShared {
            state: Mutex::new(ReaperState::default()),
            wake: Condvar::new(),
            closed: AtomicBool::new(false),
            metrics: ReaperMetrics::default(),
        });
        let for_thread = Arc::clone(&shared);
        let sweeper = thread::Builder::new()
            .name("spanbuf-reaper".into())
            .spawn(move || Self::sweep_loop(&for_thread))
            .ok();
        Self { shared, sweeper }
    }

    /// Registers `action` to run once `marker` becomes unreachable.
    ///
    /// Fails with `IllegalState` after the reaper was closed to new
    /// registrations.
    pub fn register(
        &self,
        marker: &Arc<Marker>,
        label: impl Into<String>,
        action: impl FnOnce() -> io::Result<()> + Send + 'static,
    ) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BufferError::IllegalState(
                "reaper is closed to new registrations",
            ));
        }
        let mut state = self.shared.lock();
        state.tracked.push(Tracked {
            marker: Arc::downgrade(marker),
            marker_id: marker.id(),
            label: label.into(),
            action: Box::new(action),
        });
        drop(state);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Number of markers currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.shared.lock().tracked.len()
    }

    /// Descriptions of release actions that failed, oldest first.
    pub fn failures(&self) -> Vec<String> {
        self.shared.lock().failures.clone()
    }

    /// Release counters.
    pub fn metrics(&self) -> &ReaperMetrics {
        &self.shared.metrics
    }

    /// Forbids new registrations; the sweep thread exits once the tracked
    /// set drains. Idempotent.
    pub fn exit_when_finished(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wake.notify_all();
    }

    fn sweep_loop(shared: &Arc<ReaperShared>) {
        loop {
            let dead = {
                let mut state = shared.lock();
                let dead = Self::collect_dead(&mut state);
                let drained =
                    shared.closed.load(Ordering::Acquire) && state.tracked.is_empty();
                if dead.is_empty() {
                    if drained {
                        break;
                    }
                    let _ = shared
                        .wake
                        .wait_timeout(state, SWEEP_INTERVAL)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                dead
            };
            Self::run_releases(shared, dead);
        }
    }

    fn collect_dead(state: &mut ReaperState) -> Vec<Tracked> {
        let mut dead = Vec::new();
        let mut index = 0;
        while index < state.tracked.len() {
            if state.tracked[index].marker.strong_count() == 0 {
                dead.push(state.tracked.swap_remove(index));
            } else {
                index += 1;
            }
        }
        dead
    }

    fn run_releases(shared: &Arc<ReaperShared>, dead: Vec<Tracked>) {
        for tracked in dead {
            log::debug!(
                "releasing {} (marker {})",
                tracked.label,
                tracked.marker_id
            );
            match (tracked.action)() {
                Ok(()) => shared.metrics.record_released(),
                Err(err) => {
                    shared.metrics.record_failed();
                    let failure = format!("{}: {err}", tracked.label);
                    log::warn!("release failed: {failure}");
                    shared.lock().failures.push(failure);
                }
            }
        }
    }
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reaper {{ tracked: {}, closed: {} }}",
            self.tracked_count(),
            self.shared.closed.load(Ordering::Acquire)
        )
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        // Shutdown hook: stop the sweeper, then release everything still
        // tracked, reachable or not. Actions were moved out of the shared
        // state, so each still runs at most once.
        self.shared.closed.store(true, Ordering::Release);
        let remaining = {
            let mut state = self.shared.lock();
            std::mem::take(&mut state.tracked)
        };
        self.shared.wake.notify_all();
        if let Some(handle) = self.sweeper.take() {
            let _ = handle.join();
        }
        if !remaining.is_empty() {
            log::debug!("reaper shutdown releasing {} resources", remaining.len());
            Self::run_releases(&self.shared, remaining);
        }
    }
}
