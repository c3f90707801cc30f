/// Heuristic progress
///
/// The generation server sends nothing until the stitched video is ready, so
/// the percentage shown while waiting is simulated: it starts at a fixed
/// value, grows by a fixed step on a fixed cadence and stops at a ceiling
/// below 100. It is a UX approximation only and carries no information about
/// server-side work.
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::ProgressConfig;

/// Pure stepping rules of the simulated percentage
#[derive(Debug, Clone, Copy)]
pub struct HeuristicProgress {
    config: ProgressConfig,
}

impl HeuristicProgress {
    pub fn new(config: ProgressConfig) -> Self {
        Self { config }
    }

    /// Value shown as soon as the request is accepted
    pub fn initial(&self) -> u8 {
        self.config.initial.min(self.ceiling())
    }

    pub fn ceiling(&self) -> u8 {
        self.config.effective_ceiling()
    }

    /// Next simulated value, or `None` once the ceiling is reached
    pub fn next(&self, current: u8) -> Option<u8> {
        let ceiling = self.ceiling();
        if current >= ceiling || self.config.step == 0 {
            return None;
        }
        Some(current.saturating_add(self.config.step).min(ceiling))
    }

    /// Spawn a timer advancing from `start`, calling `on_tick` with every new
    /// value. The task ends by itself at the ceiling; dropping the returned
    /// ticker cancels it at once.
    pub fn spawn<F>(&self, start: u8, on_tick: F) -> ProgressTicker
    where
        F: Fn(u8) + Send + 'static,
    {
        let rules = *self;
        let period = self.config.interval();

        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut current = start;
            while let Some(value) = rules.next(current) {
                ticks.tick().await;
                current = value;
                on_tick(current);
            }
        });

        ProgressTicker { handle }
    }
}

/// Running progress timer; aborted on drop
#[derive(Debug)]
pub struct ProgressTicker {
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Approximate "clip i of n" for a percentage, one clip per uploaded image.
/// Returns `None` when there are no files.
pub fn clip_step(progress: u8, file_count: usize) -> Option<(usize, usize)> {
    if file_count == 0 {
        return None;
    }
    let done = (progress.min(100) as usize * file_count) / 100;
    Some(((done + 1).min(file_count), file_count))
}
