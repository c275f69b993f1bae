//! Fixed-timestep game loop driver.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use tokio::task::JoinHandle;

// Layer 3: Internal module imports
use super::event_loop::Postbox;
use super::message::StageMessage;
use crate::error::PlayError;

/// Fixed-timestep parameters.
///
/// The driver accumulates real elapsed time and posts one
/// [`StageMessage::GameLoopTick`] per elapsed `fixed_timestep`, clamping
/// the backlog at `max_accumulator_cap` so a stalled stage catches up with
/// a bounded burst instead of a spiral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameLoopConfig {
    pub fixed_timestep: Duration,
    pub max_accumulator_cap: Duration,
}

impl GameLoopConfig {
    pub fn new(fixed_timestep: Duration, max_accumulator_cap: Duration) -> Self {
        Self {
            fixed_timestep,
            max_accumulator_cap,
        }
    }

    /// Enforced at loop start: the cap must be positive and at least one
    /// timestep, otherwise the start fails synchronously.
    pub fn validate(&self) -> Result<(), PlayError> {
        if self.fixed_timestep.is_zero() {
            return Err(PlayError::GameLoop(
                "fixed_timestep must be > 0".to_string(),
            ));
        }
        if self.max_accumulator_cap.is_zero() || self.max_accumulator_cap < self.fixed_timestep {
            return Err(PlayError::GameLoop(format!(
                "max_accumulator_cap {:?} must be >= fixed_timestep {:?}",
                self.max_accumulator_cap, self.fixed_timestep
            )));
        }
        Ok(())
    }
}

/// The running driver attached to one stage.
///
/// Stopping only flips a flag; the driver task observes it on its next
/// wakeup and exits. There is no join anywhere, so stopping from within a
/// tick handler cannot deadlock. Ticks already in the mailbox drain
/// normally.
pub(crate) struct GameLoopDriver {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    config: GameLoopConfig,
}

impl GameLoopDriver {
    pub(crate) fn start(postbox: Postbox, config: GameLoopConfig) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = tokio::spawn(async move {
            let timestep = config.fixed_timestep;
            let cap = config.max_accumulator_cap;
            let mut accumulator = Duration::ZERO;
            let mut last = Instant::now();

            loop {
                tokio::time::sleep(timestep).await;
                if stop_flag.load(Ordering::Acquire) {
                    return;
                }

                let now = Instant::now();
                accumulator += now - last;
                last = now;
                if accumulator > cap {
                    accumulator = cap;
                }

                while accumulator >= timestep {
                    if !postbox.post(StageMessage::GameLoopTick) {
                        return;
                    }
                    accumulator -= timestep;
                }
            }
        });
        Self {
            stop,
            handle,
            config,
        }
    }

    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Hard stop for stage close.
    pub(crate) fn abort(&self) {
        self.stop();
        self.handle.abort();
    }

    pub(crate) fn timestep(&self) -> Duration {
        self.config.fixed_timestep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_below_timestep_is_rejected() {
        let config = GameLoopConfig::new(Duration::from_millis(50), Duration::from_millis(20));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let config = GameLoopConfig::new(Duration::ZERO, Duration::from_millis(100));
        assert!(config.validate().is_err());

        let config = GameLoopConfig::new(Duration::from_millis(50), Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_config() {
        let config = GameLoopConfig::new(Duration::from_millis(50), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }
}
