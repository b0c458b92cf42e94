use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stopwatch for time spent waiting at a stage. Once stopped it stays
/// frozen; starting it again is a no-op while it is running.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WaitTimer {
    started_at: Option<DateTime<Utc>>,
    accumulated_sec: u64,
}

impl WaitTimer {
    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn stop(&mut self, now: DateTime<Utc>) {
        if let Some(started_at) = self.started_at.take() {
            self.accumulated_sec += elapsed_sec(started_at, now);
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed_sec(&self, now: DateTime<Utc>) -> u64 {
        match self.started_at {
            Some(started_at) => self.accumulated_sec + elapsed_sec(started_at, now),
            None => self.accumulated_sec,
        }
    }
}

fn elapsed_sec(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_seconds().max(0) as u64
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitTimes {
    pub pickup_sec: u64,
    pub dropoff_sec: u64,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::WaitTimer;

    #[test]
    fn idle_timer_reads_zero() {
        let timer = WaitTimer::default();
        assert_eq!(timer.elapsed_sec(Utc::now()), 0);
        assert!(!timer.is_running());
    }

    #[test]
    fn running_timer_grows_with_clock() {
        let start = Utc::now();
        let mut timer = WaitTimer::default();
        timer.start(start);

        let t1 = timer.elapsed_sec(start + Duration::seconds(10));
        let t2 = timer.elapsed_sec(start + Duration::seconds(25));
        assert_eq!(t1, 10);
        assert!(t2 >= t1);
    }

    #[test]
    fn stopped_timer_is_frozen() {
        let start = Utc::now();
        let mut timer = WaitTimer::default();
        timer.start(start);
        timer.stop(start + Duration::seconds(30));

        assert_eq!(timer.elapsed_sec(start + Duration::seconds(30)), 30);
        assert_eq!(timer.elapsed_sec(start + Duration::hours(2)), 30);
    }

    #[test]
    fn restarting_a_running_timer_keeps_original_start() {
        let start = Utc::now();
        let mut timer = WaitTimer::default();
        timer.start(start);
        timer.start(start + Duration::seconds(20));

        assert_eq!(timer.elapsed_sec(start + Duration::seconds(40)), 40);
    }
}
