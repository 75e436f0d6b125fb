//! Server lifecycle: health state and in-flight request accounting.
//!
//! Health transitions go through `ArcSwap` so probes never block; in-flight
//! requests are counted by RAII guards so a panicking handler still
//! releases its slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

/// Starting -> Ready -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Dispatcher built, listener not yet serving.
    Starting,
    Ready,
    /// Shutdown requested; new invocations are refused.
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Starting => "starting",
            HealthState::Ready => "ready",
            HealthState::Draining => "draining",
            HealthState::Stopped => "stopped",
        }
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: ArcSwap<HealthState>,
    in_flight: Arc<AtomicU64>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(HealthState::Starting),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn state(&self) -> HealthState {
        **self.state.load()
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    /// Stops admitting new requests.
    pub fn begin_drain(&self) {
        self.state.store(Arc::new(HealthState::Draining));
    }

    /// Counts a request as in flight until the guard drops.
    #[must_use]
    pub fn track_request(&self) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        RequestGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits until no request is in flight, polling every 10ms for at most
    /// `timeout`. On success the state becomes `Stopped`; on timeout it is
    /// left unchanged and `false` is returned.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.state.store(Arc::new(HealthState::Stopped));
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one in-flight slot on drop.
#[derive(Debug)]
pub struct RequestGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), HealthState::Starting);
        lifecycle.set_ready();
        assert_eq!(lifecycle.state(), HealthState::Ready);
        lifecycle.begin_drain();
        assert_eq!(lifecycle.state().as_str(), "draining");
    }

    #[test]
    fn guards_count_in_flight_requests() {
        let lifecycle = Lifecycle::new();
        let first = lifecycle.track_request();
        let second = lifecycle.track_request();
        assert_eq!(lifecycle.in_flight(), 2);
        drop(first);
        drop(second);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.begin_drain();
        let guard = lifecycle.track_request();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });

        assert!(lifecycle.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(lifecycle.state(), HealthState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn drain_timeout_leaves_state_draining() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_drain();
        let _guard = lifecycle.track_request();

        assert!(!lifecycle.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(lifecycle.state(), HealthState::Draining);
    }
}
