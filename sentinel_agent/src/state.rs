//! Shared agent state handed to every connection.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::service::TelemetryService;

#[derive(Clone)]
pub struct AppState {
    pub service: TelemetryService,
    // Connected clients, for logging
    pub client_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(service: TelemetryService) -> Self {
        Self {
            service,
            client_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}
