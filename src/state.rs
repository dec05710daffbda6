//! Shared application state

use std::sync::Arc;

use tokio::sync::Notify;

use crate::frame_cache::FrameCache;
use crate::stream_registry::StreamRegistry;

/// Handles shared between the web API, the acceptor and the scheduler
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<FrameCache>,
    pub registry: Arc<StreamRegistry>,
    /// Kicks the scheduler out of its sleep when work appears early
    pub wake: Arc<Notify>,
}
