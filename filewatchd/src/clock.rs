//! A `clock` abstraction so backoff and reclaim logic can be driven deterministically in tests
//! instead of racing real wall-clock time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test-only clock, advanced explicitly. Starts at the Unix epoch unless overridden.
pub struct ManualClock {
    unix_seconds: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            unix_seconds: AtomicI64::new(start.timestamp()),
        })
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.unix_seconds
            .fetch_add(duration.num_seconds(), Ordering::SeqCst);
    }

    pub fn set(&self, when: DateTime<Utc>) {
        self.unix_seconds.store(when.timestamp(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.unix_seconds.load(Ordering::SeqCst), 0)
            .expect("manual clock holds a valid unix timestamp")
    }
}
