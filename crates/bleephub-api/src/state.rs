//! Application state shared across handlers.

use bleephub_scheduler::{ActionCache, Scheduler};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub actions: Arc<ActionCache>,
    /// Scheme used when we hand our own URL back to runners.
    pub scheme: &'static str,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, actions: Arc<ActionCache>) -> Self {
        Self {
            scheduler,
            actions,
            scheme: "http",
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.scheme = if tls { "https" } else { "http" };
        self
    }
}
