use chrono::{DateTime, Utc};

/// Source of the current time for lifecycle timestamps and deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use self::manual::ManualClock;

#[cfg(test)]
mod manual {
    use super::Clock;
    use chrono::{DateTime, TimeDelta, Utc};
    use std::sync::Mutex;

    pub struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub fn new(start: DateTime<Utc>) -> ManualClock {
            ManualClock(Mutex::new(start))
        }

        pub fn advance(&self, delta: TimeDelta) {
            *self.0.lock().unwrap() += delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }
}
