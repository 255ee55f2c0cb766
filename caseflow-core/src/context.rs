use std::sync::Arc;

use crate::config::Config;
use crate::db::create_pool;
use crate::repos::Repos;

/// Shared handle passed to every service: configuration plus the
/// storage repos. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub repos: Repos,
}

impl AppContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = create_pool(&config.database).await?;
        Ok(AppContext {
            config: Arc::new(config),
            repos: Repos::create_postgres(pool),
        })
    }

    /// Context backed by in-memory repos. Used by tests and useful
    /// for running the stack without Postgres.
    pub fn inmemory(config: Config) -> Self {
        AppContext {
            config: Arc::new(config),
            repos: Repos::create_inmemory(),
        }
    }
}
