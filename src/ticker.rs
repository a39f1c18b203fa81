//! Periodic tasks driven by the control loop's clock.

use std::time::{Duration, Instant};

/// A repeating task that fires every `period` while started.
///
/// There is no thread behind it: [`Player::update`](crate::Player::update)
/// asks each task whether it is due. Starting an already running task keeps
/// its schedule, so there is never more than one instance of each.
#[derive(Clone, Debug)]
pub struct PeriodicTask {
    period: Duration,
    next_due: Option<Instant>,
}

impl PeriodicTask {
    pub fn new(period: Duration) -> Self {
        Self { period, next_due: None }
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// Start firing one period from `now`. No-op while running.
    pub fn start(&mut self, now: Instant) {
        if self.next_due.is_none() {
            self.next_due = Some(now + self.period);
        }
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    /// Whether the task fires at `now`; advances the schedule if so.
    ///
    /// A late caller gets one firing, not one per missed period.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                let mut next = due + self.period;
                if next <= now {
                    next = now + self.period;
                }
                self.next_due = Some(next);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_period() {
        let t0 = Instant::now();
        let mut task = PeriodicTask::new(Duration::from_millis(20));
        assert!(!task.poll(t0 + Duration::from_millis(100)));

        task.start(t0);
        assert!(!task.poll(t0 + Duration::from_millis(19)));
        assert!(task.poll(t0 + Duration::from_millis(20)));
        assert!(!task.poll(t0 + Duration::from_millis(39)));
        assert!(task.poll(t0 + Duration::from_millis(40)));
    }

    #[test]
    fn restart_does_not_double_schedule() {
        let t0 = Instant::now();
        let mut task = PeriodicTask::new(Duration::from_millis(100));
        task.start(t0);
        task.start(t0 + Duration::from_millis(50));
        assert!(task.poll(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn late_poll_fires_once() {
        let t0 = Instant::now();
        let mut task = PeriodicTask::new(Duration::from_millis(20));
        task.start(t0);
        assert!(task.poll(t0 + Duration::from_millis(205)));
        assert!(!task.poll(t0 + Duration::from_millis(210)));
        assert!(task.poll(t0 + Duration::from_millis(225)));
    }

    #[test]
    fn stopped_task_never_fires() {
        let t0 = Instant::now();
        let mut task = PeriodicTask::new(Duration::from_millis(20));
        task.start(t0);
        task.stop();
        assert!(!task.is_running());
        assert!(!task.poll(t0 + Duration::from_secs(1)));
    }
}
