// src/fetch/politeness.rs

//! Per-host politeness delay tracker.
//!
//! Shared by all workers. The scheduler's host locks guarantee at most one
//! in-flight request per host; this table enforces the minimum gap between
//! a completed poll and the next dispatch to the same host.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct HostDelayTracker {
    min_delay: Duration,
    last_completed: Mutex<HashMap<String, Instant>>,
}

impl HostDelayTracker {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_completed: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep until the host's politeness window has passed.
    pub async fn wait(&self, host: &str) {
        let remaining = {
            let table = self.last_completed.lock().expect("host table poisoned");
            table.get(host).and_then(|last| {
                let elapsed = last.elapsed();
                (elapsed < self.min_delay).then(|| self.min_delay - elapsed)
            })
        };
        if let Some(remaining) = remaining {
            tokio::time::sleep(remaining).await;
        }
    }

    /// Record a completed request to the host.
    pub fn mark_complete(&self, host: &str) {
        let mut table = self.last_completed.lock().expect("host table poisoned");
        table.insert(host.to_string(), Instant::now());
    }

    /// Time until the host may be polled again; zero when idle.
    pub fn remaining(&self, host: &str) -> Duration {
        let table = self.last_completed.lock().expect("host table poisoned");
        match table.get(host) {
            Some(last) => {
                let elapsed = last.elapsed();
                if elapsed < self.min_delay {
                    self.min_delay - elapsed
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }
}
