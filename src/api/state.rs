//! Application state for the API server

use crate::{BunkrDownloader, Config};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
#[derive(Clone)]
pub struct AppState {
    /// The engine every job route delegates to
    pub downloader: Arc<BunkrDownloader>,

    /// Configuration (API settings, network defaults, browse root)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(downloader: Arc<BunkrDownloader>, config: Arc<Config>) -> Self {
        Self { downloader, config }
    }
}
