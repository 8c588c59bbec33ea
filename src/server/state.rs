//! Shared application state for the HTTP/WS boundary.

use std::sync::Arc;

use crate::config::Config;
use crate::effects::Effects;
use crate::feedback::FeedbackInbox;
use crate::job::store::Store;
use crate::progress::ProgressHub;

pub struct AppState {
    pub store: Store,
    pub progress: Arc<ProgressHub>,
    pub feedback: Arc<FeedbackInbox>,
    pub effects: Effects,
    pub config: Arc<Config>,
}

pub type SharedState = Arc<AppState>;
