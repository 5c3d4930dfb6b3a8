use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Source of wall-clock time for a pipeline
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant. Useful in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Per-run view of a clock whose readings never go backwards, even if the
/// underlying wall clock is adjusted mid-run.
pub struct RunClock<'a> {
    clock: &'a dyn Clock,
    last: Option<DateTime<Utc>>,
}

impl<'a> RunClock<'a> {
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self { clock, last: None }
    }

    pub fn tick(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        let next = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last = Some(next);
        next
    }
}

/// Replays a fixed sequence of readings, repeating the last one. Lets tests
/// simulate a wall clock that steps backwards.
pub struct SequenceClock {
    readings: Mutex<Vec<DateTime<Utc>>>,
}

impl SequenceClock {
    pub fn new(mut readings: Vec<DateTime<Utc>>) -> Self {
        readings.reverse();
        Self {
            readings: Mutex::new(readings),
        }
    }
}

impl Clock for SequenceClock {
    fn now(&self) -> DateTime<Utc> {
        let mut readings = match self.readings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if readings.len() > 1 {
            readings.pop().unwrap_or_else(Utc::now)
        } else {
            readings.last().copied().unwrap_or_else(Utc::now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_clock_never_goes_backwards() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 1, 1, 13, 0, 0).unwrap();
        let clock = SequenceClock::new(vec![t1, t0, t2]);
        let mut run = RunClock::new(&clock);
        assert_eq!(run.tick(), t1);
        assert_eq!(run.tick(), t1);
        assert_eq!(run.tick(), t2);
        assert_eq!(run.tick(), t2);
    }
}
