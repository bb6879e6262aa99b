use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::TracerCore;

/// One-shot timer driving tracer ticks; re-armed by the tick handler.
///
/// Firing upgrades a weak handle to the tracer core, so a timer that
/// outlives its tracer silently does nothing.
pub(crate) struct TickTimer {
    token: Option<CancellationToken>,
}

impl TickTimer {
    pub fn new() -> Self {
        Self { token: None }
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }

    /// Marks the pending schedule as consumed, without cancelling.
    pub fn clear(&mut self) {
        self.token = None;
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// Schedules one tick after `delay`. Must run inside a tokio runtime.
    pub fn activate(&mut self, delay: Duration, core: Weak<Mutex<TracerCore>>) {
        self.cancel();

        let token = CancellationToken::new();
        self.token = Some(token.clone());

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(core) = core.upgrade() {
                        super::run_tick(&core, true);
                    }
                }
            }
        });
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
