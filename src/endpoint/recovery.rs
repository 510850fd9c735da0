//! Recovery schedule
//!
//! Step 1 reconnects immediately after the fault. Every later step waits the
//! delay of the first tier whose `until_step` covers it.

use std::time::Duration;

use crate::config::RecoverySection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySchedule {
    max_steps: u32,
    /// `(until_step, delay)`, ordered by step
    tiers: Vec<(u32, Duration)>,
}

impl RecoverySchedule {
    pub fn new(max_steps: u32, tiers: Vec<(u32, Duration)>) -> Self {
        Self { max_steps, tiers }
    }

    /// Same step count, every wait replaced by `delay`
    pub fn uniform(max_steps: u32, delay: Duration) -> Self {
        Self::new(max_steps, vec![(max_steps, delay)])
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Wait before attempting `step`, or `None` once the schedule is exhausted
    pub fn delay_before(&self, step: u32) -> Option<Duration> {
        if step == 0 || step > self.max_steps {
            return None;
        }
        if step == 1 {
            return Some(Duration::ZERO);
        }
        let delay = self
            .tiers
            .iter()
            .find(|(until_step, _)| step <= *until_step)
            .or_else(|| self.tiers.last())
            .map_or(Duration::ZERO, |(_, delay)| *delay);
        Some(delay)
    }

    /// Sum of every wait when all steps fail
    pub fn total_wait(&self) -> Duration {
        (1..=self.max_steps).filter_map(|step| self.delay_before(step)).sum()
    }
}

impl Default for RecoverySchedule {
    fn default() -> Self {
        Self::from(&RecoverySection::default())
    }
}

impl From<&RecoverySection> for RecoverySchedule {
    fn from(section: &RecoverySection) -> Self {
        Self::new(
            section.max_steps,
            section
                .tiers
                .iter()
                .map(|tier| (tier.until_step, Duration::from_millis(tier.delay_ms)))
                .collect(),
        )
    }
}
