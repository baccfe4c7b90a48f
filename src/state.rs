use crate::event::EventQueue;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn EventQueue>,
    /// Shared secret for `X-Signature-256`; verification is off when unset
    pub receiver_secret: Option<String>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(queue: Arc<dyn EventQueue>, receiver_secret: Option<String>) -> Self {
        Self {
            queue,
            receiver_secret,
            started_at: Instant::now(),
        }
    }
}
