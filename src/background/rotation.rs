//! Periodic header rotation.
//!
//! The loop sleeps a uniform delay from the configured window, rotates, and
//! repeats. It ends when [`RotationHandle::stop`] is called or the handle is
//! dropped; a stop during a sleep aborts the sleep immediately.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{abortable, AbortHandle};
use gloo_timers::future::TimeoutFuture;
use rand::Rng;

use super::synchronizer::{HeaderRuleSynchronizer, RuleEngine};
use crate::config::RotationWindow;
use crate::error::Result;
use crate::rng::SessionRng;

#[async_trait(?Send)]
pub trait Sleeper {
    async fn sleep(&self, duration: Duration);
}

/// Browser timer sleeps.
pub struct BrowserSleeper;

#[async_trait(?Send)]
impl Sleeper for BrowserSleeper {
    async fn sleep(&self, duration: Duration) {
        // Rotation windows are validated to fit the timer range
        let millis = u32::try_from(duration.as_millis()).unwrap_or(i32::MAX as u32);
        TimeoutFuture::new(millis).await;
    }
}

/// One unit of periodic work.
#[async_trait(?Send)]
pub trait RotationTask {
    async fn rotate(&self) -> Result<()>;
}

#[async_trait(?Send)]
impl<E: RuleEngine> RotationTask for HeaderRuleSynchronizer<E> {
    async fn rotate(&self) -> Result<()> {
        self.update_rules().await
    }
}

/// Uniform delay in `[window.min, window.max]`, at millisecond resolution.
pub fn next_delay(window: &RotationWindow, rng: &mut impl Rng) -> Duration {
    let min = window.min().as_millis() as u64;
    let max = (window.max().as_millis() as u64).max(min);
    Duration::from_millis(rng.gen_range(min..=max))
}

#[derive(Default)]
struct RotationState {
    stopped: Cell<bool>,
    rotations: Cell<u64>,
}

pub struct RotationScheduler {
    window: RotationWindow,
    rng: SessionRng,
}

impl RotationScheduler {
    pub fn new(window: RotationWindow, rng: SessionRng) -> Self {
        Self { window, rng }
    }

    /// Run the loop on the browser event loop with timer sleeps.
    pub fn start(self, task: Rc<dyn RotationTask>) -> RotationHandle {
        let (handle, rotation) = self.start_with(task, Rc::new(BrowserSleeper));
        wasm_bindgen_futures::spawn_local(rotation);
        handle
    }

    /// The handle plus the loop future; the caller decides where it runs.
    pub fn start_with(
        self,
        task: Rc<dyn RotationTask>,
        sleeper: Rc<dyn Sleeper>,
    ) -> (RotationHandle, impl Future<Output = ()>) {
        let state = Rc::new(RotationState::default());
        let Self { window, rng } = self;
        log::info!(
            "⏱️ Header rotation every {}-{} minutes",
            window.min_minutes,
            window.max_minutes
        );

        let loop_state = Rc::clone(&state);
        let rotation = async move {
            let mut rng = rng;
            loop {
                let delay = next_delay(&window, &mut rng);
                log::debug!("Next header rotation in {}s", delay.as_secs());
                sleeper.sleep(delay).await;
                if loop_state.stopped.get() {
                    break;
                }
                // Failures are logged by the task; the schedule continues
                let _ = task.rotate().await;
                loop_state.rotations.set(loop_state.rotations.get() + 1);
            }
        };
        let (rotation, abort) = abortable(rotation);

        let handle = RotationHandle { abort, state };
        (handle, async move {
            let _ = rotation.await;
        })
    }
}

/// Stops the rotation loop when stopped or dropped.
pub struct RotationHandle {
    abort: AbortHandle,
    state: Rc<RotationState>,
}

impl RotationHandle {
    pub fn stop(&self) {
        if self.state.stopped.replace(true) {
            return;
        }
        self.abort.abort();
        log::info!("⏹️ Header rotation stopped after {} rotations", self.rotations());
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.get()
    }

    /// Completed rotation attempts, successful or not.
    pub fn rotations(&self) -> u64 {
        self.state.rotations.get()
    }
}

impl Drop for RotationHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_delay_within_window() {
        let window = RotationWindow::default();
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..1000 {
            let delay = next_delay(&window, &mut rng);
            assert!(delay >= Duration::from_secs(30 * 60));
            assert!(delay <= Duration::from_secs(120 * 60));
        }
    }

    #[test]
    fn test_degenerate_window() {
        let window = RotationWindow {
            min_minutes: 5,
            max_minutes: 5,
        };
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(next_delay(&window, &mut rng), Duration::from_secs(300));
    }
}
