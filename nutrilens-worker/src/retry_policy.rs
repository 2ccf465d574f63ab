//! Backoff schedule and give-up rule.

use nutrilens_core::RetrySettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Non-decreasing delays, indexed by `attempts - 1`.
    schedule: Vec<u64>,
    cap_seconds: u64,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings, max_attempts: u32) -> Self {
        let cap_seconds = settings.cap_seconds;
        let mut floor = 0;
        let schedule = settings
            .schedule_seconds
            .iter()
            .map(|delay| {
                floor = floor.max(*delay).min(cap_seconds);
                floor
            })
            .collect();
        Self {
            schedule,
            cap_seconds,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next attempt after `attempts` invocations.
    ///
    /// Past the end of the schedule the last entry repeats.
    pub fn delay_seconds(&self, attempts: u32) -> u64 {
        let index = attempts.saturating_sub(1) as usize;
        self.schedule
            .get(index)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or(self.cap_seconds)
            .min(self.cap_seconds)
    }

    /// Backoff widened to a provider-suggested minimum wait.
    pub fn delay_with_hint(&self, attempts: u32, retry_after_sec: Option<u64>) -> u64 {
        let delay = self.delay_seconds(attempts);
        retry_after_sec.map_or(delay, |hint| delay.max(hint))
    }

    pub fn should_give_up(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
