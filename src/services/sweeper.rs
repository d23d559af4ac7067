//! Periodic expiry sweep over the whole key space.
//!
//! Catches what the read path never sees: one-time objects nobody fetched and
//! time-bounded objects whose owner never came back. Each run is stateless;
//! every key is judged on freshly fetched metadata.

use crate::{
    models::{object::ListEntry, retention::RetentionRecord},
    services::{
        object_store::{ObjectStore, StorageResult},
        retention_policy::is_expired,
    },
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Delay before the first run after startup.
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Per-key checks in flight at once.
    pub concurrency: usize,
    /// Fallback max age for one-time objects, in seconds.
    pub fallback_max_age: i64,
}

/// Counts from one sweep run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub deleted: usize,
    pub retained: usize,
    /// Listed, but gone by the time its metadata was fetched.
    pub vanished: usize,
    /// Head or delete failed; retried next run.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOutcome {
    Retained,
    Deleted,
    Vanished,
    Failed,
}

impl SweepReport {
    fn record(&mut self, outcome: KeyOutcome) {
        self.checked += 1;
        match outcome {
            KeyOutcome::Retained => self.retained += 1,
            KeyOutcome::Deleted => self.deleted += 1,
            KeyOutcome::Vanished => self.vanished += 1,
            KeyOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct Sweeper {
    store: Arc<dyn ObjectStore>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(store: Arc<dyn ObjectStore>, config: SweeperConfig) -> Self {
        Self { store, config }
    }

    /// Run once after `initial_delay`, then every `interval`. A failed run
    /// is logged and the loop carries on.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(self.config.initial_delay).await;
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(error) = self.sweep_once().await {
                    warn!("[sweeper] run aborted: {}", error);
                }
            }
        })
    }

    pub async fn sweep_once(&self) -> StorageResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Walk every page, judging each key as of `now`.
    ///
    /// Pages are processed one at a time; within a page at most
    /// `concurrency` keys are checked at once. A listing failure ends the
    /// run with an error.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> StorageResult<SweepReport> {
        info!(
            "[sweeper] start, fallback max age {}s",
            self.config.fallback_max_age
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut report = SweepReport::default();
        let mut token = None;

        loop {
            let page = self.store.list_page(token).await?;

            let mut tasks = JoinSet::new();
            for entry in page.entries {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let store = self.store.clone();
                let fallback_max_age = self.config.fallback_max_age;
                tasks.spawn(async move {
                    let _permit = permit;
                    check_key(store.as_ref(), entry, now, fallback_max_age).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => report.record(outcome),
                    Err(err) => {
                        warn!("[sweeper] key check task failed: {}", err);
                        report.record(KeyOutcome::Failed);
                    }
                }
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(
            "[sweeper] done: checked {}, deleted {}, retained {}, vanished {}, failed {}",
            report.checked, report.deleted, report.retained, report.vanished, report.failed
        );
        Ok(report)
    }
}

async fn check_key(
    store: &dyn ObjectStore,
    entry: ListEntry,
    now: DateTime<Utc>,
    fallback_max_age: i64,
) -> KeyOutcome {
    let head = match store.head(&entry.key).await {
        Ok(Some(head)) => head,
        Ok(None) => {
            debug!("[sweeper] {} vanished before inspection", entry.key);
            return KeyOutcome::Vanished;
        }
        Err(err) => {
            warn!("[sweeper] error reading metadata of {}: {}", entry.key, err);
            return KeyOutcome::Failed;
        }
    };

    let record = RetentionRecord::from_metadata(&head.metadata, entry.last_modified);
    if !is_expired(&record, now, fallback_max_age) {
        return KeyOutcome::Retained;
    }

    match store.delete(&entry.key).await {
        Ok(()) => {
            info!(
                "[sweeper] deleted expired object {} (uploaded {})",
                entry.key, record.upload_time
            );
            KeyOutcome::Deleted
        }
        Err(err) => {
            warn!("[sweeper] failed to delete {}: {}", entry.key, err);
            KeyOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object::{ByteStream, ListPage, Metadata, ObjectHead},
        services::{
            object_store::StorageError,
            retention_policy::decide_on_ingestion,
            storage_service::tests::{body_of, open_temp_store},
        },
    };
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };

    const FALLBACK: i64 = 3600;

    fn config() -> SweeperConfig {
        SweeperConfig {
            initial_delay: Duration::ZERO,
            interval: Duration::from_secs(60),
            concurrency: 2,
            fallback_max_age: FALLBACK,
        }
    }

    async fn put_with(store: &dyn ObjectStore, key: &str, record: RetentionRecord) {
        store
            .put(key, body_of(&["data"]), record.to_metadata(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_one_time_objects_go_and_young_ones_stay() {
        let (_dir, store) = open_temp_store().await;
        let store: Arc<dyn ObjectStore> = Arc::new(store);
        let now = Utc::now();

        put_with(
            store.as_ref(),
            "old001",
            decide_on_ingestion(None, now - ChronoDuration::seconds(2 * FALLBACK)),
        )
        .await;
        put_with(
            store.as_ref(),
            "new001",
            decide_on_ingestion(None, now - ChronoDuration::seconds(FALLBACK / 2)),
        )
        .await;

        let report = Sweeper::new(store.clone(), config())
            .sweep_at(now)
            .await
            .unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.retained, 1);
        assert!(store.head("old001").await.unwrap().is_none());
        assert!(store.head("new001").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn time_bounded_objects_follow_their_own_deadline() {
        let (_dir, store) = open_temp_store().await;
        let store: Arc<dyn ObjectStore> = Arc::new(store);
        let now = Utc::now();

        // lapsed ten seconds ago, despite being younger than the fallback age
        put_with(
            store.as_ref(),
            "lapsed.txt",
            decide_on_ingestion(Some(60), now - ChronoDuration::seconds(70)),
        )
        .await;
        // older than the fallback age, but its window is still open
        put_with(
            store.as_ref(),
            "alive.txt",
            decide_on_ingestion(Some(3 * FALLBACK), now - ChronoDuration::seconds(2 * FALLBACK)),
        )
        .await;

        let report = Sweeper::new(store.clone(), config())
            .sweep_at(now)
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert!(store.head("lapsed.txt").await.unwrap().is_none());
        assert!(store.head("alive.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn objects_without_metadata_age_from_last_modified() {
        let (_dir, store) = open_temp_store().await;
        store
            .put("bare01", body_of(&["x"]), Metadata::new(), None)
            .await
            .unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(store);
        let sweeper = Sweeper::new(store.clone(), config());

        let report = sweeper.sweep_at(Utc::now()).await.unwrap();
        assert_eq!(report.retained, 1);

        let later = Utc::now() + ChronoDuration::seconds(FALLBACK + 60);
        let report = sweeper.sweep_at(later).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.head("bare01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweeps_every_page() {
        let (_dir, store) = open_temp_store().await;
        let store: Arc<dyn ObjectStore> = Arc::new(store.with_page_size(3));
        let stale = decide_on_ingestion(None, Utc::now() - ChronoDuration::days(1));
        for i in 0..10 {
            put_with(store.as_ref(), &format!("key{:03}", i), stale).await;
        }

        let report = Sweeper::new(store.clone(), config())
            .sweep_once()
            .await
            .unwrap();
        assert_eq!(report.checked, 10);
        assert_eq!(report.deleted, 10);
        assert!(store.list_page(None).await.unwrap().entries.is_empty());
    }

    /// Lists keys that no longer exist, fails listing on demand, and tracks
    /// how many heads run at once.
    struct ScriptedStore {
        listed: Vec<&'static str>,
        fail_listing: bool,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(listed: Vec<&'static str>, fail_listing: bool) -> Self {
            Self {
                listed,
                fail_listing,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        async fn head(&self, _key: &str) -> StorageResult<Option<ObjectHead>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }
        async fn get(&self, _key: &str) -> StorageResult<Option<(ObjectHead, ByteStream)>> {
            Ok(None)
        }
        async fn put(
            &self,
            _key: &str,
            _body: ByteStream,
            _metadata: Metadata,
            _content_type: Option<String>,
        ) -> StorageResult<ObjectHead> {
            Err(StorageError::Io(io::Error::other("read-only")))
        }
        async fn delete(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }
        async fn list_page(&self, _token: Option<String>) -> StorageResult<ListPage> {
            if self.fail_listing {
                return Err(StorageError::Io(io::Error::other("store unreachable")));
            }
            Ok(ListPage {
                entries: self
                    .listed
                    .iter()
                    .map(|key| ListEntry {
                        key: key.to_string(),
                        last_modified: Utc::now(),
                    })
                    .collect(),
                next_token: None,
            })
        }
    }

    #[tokio::test]
    async fn keys_vanishing_mid_sweep_are_not_errors() {
        let scripted = Arc::new(ScriptedStore::new(vec!["a", "b", "c", "d", "e"], false));
        let report = Sweeper::new(scripted.clone(), config())
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.vanished, 5);
        assert_eq!(report.failed, 0);
        assert!(scripted.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn listing_failure_aborts_the_run() {
        let scripted = Arc::new(ScriptedStore::new(vec!["a"], true));
        let result = Sweeper::new(scripted, config()).sweep_once().await;
        assert!(result.is_err());
    }
}
