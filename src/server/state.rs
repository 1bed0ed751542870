use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::Dispatcher;
use crate::metrics::Metrics;

/// Everything a connection task needs, shared across the whole process.
///
/// Cheap to clone — every field is an `Arc` or `Copy` value — so each
/// accepted connection gets its own owned handle instead of borrowing from
/// the listener task.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub metrics: Metrics,
    pub request_timeout: Duration,
}

impl GatewayState {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, metrics: Metrics, request_timeout: Duration) -> Self {
        Self {
            dispatcher,
            metrics,
            request_timeout,
        }
    }
}
