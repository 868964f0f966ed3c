// src/context.rs

//! Explicitly constructed backend handles shared by the services.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::storage::{DocumentStore, ObjectStore};

/// Source of the current time for record timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Document store, object store and clock used by one application instance.
#[derive(Clone)]
pub struct ServiceContext {
    pub documents: Arc<dyn DocumentStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub clock: Arc<dyn Clock>,
}

impl ServiceContext {
    pub fn new(documents: Arc<dyn DocumentStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            documents,
            objects,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock (tests step time explicitly).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
