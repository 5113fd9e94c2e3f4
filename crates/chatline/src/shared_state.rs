//! State shared by every HTTP handler

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use crate::config::Config;
use crate::service::ChatService;

/// Lock-free request counters, reported by the admin stats endpoint
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub total_requests: AtomicUsize,
    pub streams_started: AtomicUsize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_total_requests(&self) -> usize {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_streams_started(&self) -> usize {
        self.streams_started.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> (usize, usize) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.streams_started.load(Ordering::Relaxed),
        )
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub config: Arc<Config>,
    pub counters: Arc<AtomicCounters>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: ChatService, config: Config) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
            counters: Arc::new(AtomicCounters::new()),
            started_at: Instant::now(),
        }
    }
}
