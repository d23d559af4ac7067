use crate::{
    config::AppConfig,
    services::{
        lifecycle_service::ObjectLifecycle,
        object_store::ObjectStore,
        reclaimer::Reclaimer,
        short_link::ShortLinkClient,
        timed_store::TimedStore,
    },
};
use anyhow::Result;
use std::sync::Arc;

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ObjectStore>,
    pub lifecycle: Arc<ObjectLifecycle>,
}

impl AppState {
    /// Wire the lifecycle services around `backend`.
    ///
    /// Every store call goes through a timeout wrapper; the reclaimer's
    /// delete workers are spawned here.
    pub fn assemble(config: AppConfig, backend: Arc<dyn ObjectStore>) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(TimedStore::new(
            backend,
            config.store_timeout,
            config.upload_timeout,
        ));

        let reclaimer = Reclaimer::spawn(
            store.clone(),
            config.reclaim_grace,
            config.reclaim_concurrency,
        );
        let short_links = ShortLinkClient::new(config.short_url_service.clone())?;
        let lifecycle = ObjectLifecycle::new(
            store.clone(),
            config.lifecycle_settings(),
            reclaimer,
            Some(short_links),
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            lifecycle: Arc::new(lifecycle),
        })
    }
}
