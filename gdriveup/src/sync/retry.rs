use std::time::Duration;

use rand::Rng;

/// Wait policy between attempts of one file job. The schedule is fixed when
/// the policy is built: one entry per allowed retry, doubling from `base`
/// and saturating at `cap`. Running out of schedule is what ends a job's
/// retry loop. With jitter on, each wait is drawn uniformly between zero
/// and its scheduled value so parallel retries spread out.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, attempts: u32, jitter: bool) -> Self {
        let mut schedule = Vec::with_capacity(attempts.saturating_sub(1) as usize);
        let mut next = base.min(cap);
        for _ in 1..attempts {
            schedule.push(next);
            next = next.saturating_mul(2).min(cap);
        }
        Self { schedule, jitter }
    }

    /// Scheduled wait after the given failed attempt (1-based), or `None`
    /// when the attempt budget is spent.
    pub fn scheduled(&self, attempt: u32) -> Option<Duration> {
        let index = attempt.checked_sub(1)? as usize;
        self.schedule.get(index).copied()
    }

    /// The wait to actually apply, jittered when enabled.
    pub fn wait_after(&self, attempt: u32) -> Option<Duration> {
        let scheduled = self.scheduled(attempt)?;
        if self.jitter && !scheduled.is_zero() {
            Some(rand::thread_rng().gen_range(Duration::ZERO..=scheduled))
        } else {
            Some(scheduled)
        }
    }
}
