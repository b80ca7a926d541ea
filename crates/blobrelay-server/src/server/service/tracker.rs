//! In-flight call accounting.
//!
//! Every accepted call holds a [`CallGuard`] until its scope has settled. The
//! tracker uses the guards to refuse calls once draining starts, to report when
//! the last call has finished, and to hand out the force-stop token each call
//! scope derives from.

use crate::server::telemetry::{
    decrement_calls_inflight, increment_calls, increment_calls_inflight, record_call_duration,
};
use blobrelay_core::{Error, Result};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use core::time::Duration;
use std::{sync::Arc, time::Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct CallTracker {
    inflight: AtomicUsize,
    draining: AtomicBool,
    force: CancellationToken,
    idle: Notify,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once [`begin_drain`](Self::begin_drain)
    /// has been called.
    pub fn admit(self: &Arc<Self>, method: &'static str) -> Result<CallGuard> {
        if self.is_draining() {
            tracing::debug!(method, "Rejecting call while draining");
            return Err(Error::ServiceShutdown);
        }

        self.inflight.fetch_add(1, Ordering::AcqRel);
        increment_calls(method);
        increment_calls_inflight();
        tracing::info!(method, "Call started");

        Ok(CallGuard {
            tracker: Arc::clone(self),
            method,
            started: Instant::now(),
        })
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Stops admitting new calls. Calls already running are unaffected.
    pub fn begin_drain(&self) {
        if !self.draining.swap(true, Ordering::AcqRel) {
            tracing::info!(inflight = self.inflight(), "Draining in-flight calls");
        }
    }

    /// Token cancelled by [`force_stop`](Self::force_stop); parent of every
    /// call scope's token.
    pub fn force_token(&self) -> &CancellationToken {
        &self.force
    }

    /// Cancels every in-flight call and refuses new ones.
    pub fn force_stop(&self) {
        self.begin_drain();
        if !self.force.is_cancelled() {
            tracing::warn!(inflight = self.inflight(), "Force-stopping in-flight calls");
            self.force.cancel();
        }
    }

    /// Resolves once no call is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            let mut notified = core::pin::pin!(notified);
            notified.as_mut().enable();
            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Marks one call as in flight until dropped.
#[derive(Debug)]
pub struct CallGuard {
    tracker: Arc<CallTracker>,
    method: &'static str,
    started: Instant,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        tracing::info!(
            method = self.method,
            duration_ms = saturating_millis(elapsed),
            "Call finished"
        );
        decrement_calls_inflight();
        record_call_duration(self.method, elapsed.as_secs_f64() * 1000.0);
        self.tracker.release();
    }
}

fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
