//! Engine services: build creation, state transitions, history, diffs
//! and lifecycle operations.

pub mod build_number;
pub mod commits;
pub mod coordinator;
pub mod history;
pub mod lifecycle;
pub mod params;
pub mod state;

use std::sync::Arc;

use crate::cache::QueryCache;
use crate::config::EngineConfig;
use crate::event::{EventPublisher, LogPublisher};
use crate::vcs::VcsClient;

/// Collaborators shared by every engine operation.
///
/// `vcs` is optional: applications without a bound repository still build,
/// they just carry the canonical parameters only.
#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub vcs: Option<Arc<dyn VcsClient>>,
    pub events: Arc<dyn EventPublisher>,
    pub cache: Arc<QueryCache>,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        vcs: Option<Arc<dyn VcsClient>>,
        events: Arc<dyn EventPublisher>,
    ) -> EngineContext {
        EngineContext {
            config,
            vcs,
            events,
            cache: Arc::new(QueryCache::new()),
        }
    }

    /// Context with no VCS and a logging event publisher.
    pub fn detached(config: EngineConfig) -> EngineContext {
        EngineContext::new(config, None, Arc::new(LogPublisher))
    }
}
