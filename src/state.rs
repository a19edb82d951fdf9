use std::sync::Arc;

use crate::attachments::DEFAULT_MAX_BYTES;
use crate::auth::TokenIssuer;
use crate::db::Db;
use crate::stats::StatsCache;

/// Shared handles for request handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub issuer: Arc<TokenIssuer>,
    pub max_upload_bytes: usize,
    pub stats: Arc<StatsCache>,
}

impl AppState {
    pub fn new(db: Db, issuer: TokenIssuer) -> Self {
        AppState {
            db,
            issuer: Arc::new(issuer),
            max_upload_bytes: DEFAULT_MAX_BYTES,
            stats: Arc::new(StatsCache::default()),
        }
    }

    pub fn with_max_upload_bytes(mut self, max: usize) -> Self {
        self.max_upload_bytes = max;
        self
    }

    pub fn with_stats_cache(mut self, cache: StatsCache) -> Self {
        self.stats = Arc::new(cache);
        self
    }
}
