use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{hub::NotificationHub, wake::WakeSignal};

/// Shared application state passed to all route handlers and the worker.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub wake: Arc<WakeSignal>,
    pub hub: Arc<NotificationHub>,
}

impl AppState {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            wake: Arc::new(WakeSignal::new()),
            hub: Arc::new(NotificationHub::new()),
        }
    }
}
