use std::sync::Arc;

use crate::services::{queue::JobQueue, session::SessionManager};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub session: Arc<SessionManager>,
    pub worker_count: usize,
}

impl AppState {
    pub fn new(queue: Arc<JobQueue>, session: Arc<SessionManager>, worker_count: usize) -> Self {
        Self {
            queue,
            session,
            worker_count,
        }
    }
}
