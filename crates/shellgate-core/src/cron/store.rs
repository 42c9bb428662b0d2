//! Cron job persistence.
//!
//! Jobs are serialized as JSON documents keyed `cron/jobs/{id}.json`. An
//! in-memory cache fronts the store; cache and store are updated inside the
//! same critical section so readers never observe one without the other.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::CronJob;
use crate::storage::KvStore;

const KEY_PREFIX: &str = "cron/jobs/";

fn key_for(id: &str) -> String {
    format!("{KEY_PREFIX}{id}.json")
}

/// Cached, persistent collection of cron jobs.
pub struct CronJobStore {
    kv: Arc<dyn KvStore>,
    cache: RwLock<HashMap<String, CronJob>>,
}

impl CronJobStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load every persisted job into the cache. Unparseable documents are
    /// logged and skipped. Returns the number of jobs loaded.
    pub async fn load_all(&self) -> anyhow::Result<usize> {
        let keys = self.kv.list(KEY_PREFIX).await?;
        let mut cache = self.cache.write().await;
        cache.clear();

        for key in keys {
            let Some(bytes) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<CronJob>(&bytes) {
                Ok(job) => {
                    cache.insert(job.id.clone(), job);
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "Skipping unreadable cron job");
                }
            }
        }

        Ok(cache.len())
    }

    /// Insert or update a job, writing cache and store together.
    pub async fn save(&self, job: &CronJob) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(job)?;
        let mut cache = self.cache.write().await;
        self.kv.put(&key_for(&job.id), &bytes).await?;
        cache.insert(job.id.clone(), job.clone());
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<CronJob> {
        self.cache.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self.cache.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    pub async fn list_for_user(&self, user_id: &str) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self
            .cache
            .read()
            .await
            .values()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// Remove a job from cache and store. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let mut cache = self.cache.write().await;
        let existed_in_store = self.kv.delete(&key_for(id)).await?;
        let existed_in_cache = cache.remove(id).is_some();
        Ok(existed_in_store || existed_in_cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;

    fn store() -> CronJobStore {
        CronJobStore::new(Arc::new(MemoryKvStore::new()))
    }

    fn job(name: &str, user: &str) -> CronJob {
        CronJob::new(user, name, "0 0 * * *", "date", "c1")
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = store();
        let job = job("nightly", "u1");
        store.save(&job).await.unwrap();

        let loaded = store.get(&job.id).await.unwrap();
        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn test_persisted_layout() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = CronJobStore::new(kv.clone());
        let job = job("nightly", "u1");
        store.save(&job).await.unwrap();

        let raw = kv
            .get(&format!("cron/jobs/{}.json", job.id))
            .await
            .unwrap()
            .expect("job document");
        let parsed: CronJob = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, job);
    }

    #[tokio::test]
    async fn test_load_all_rebuilds_cache() {
        let kv = Arc::new(MemoryKvStore::new());
        {
            let store = CronJobStore::new(kv.clone());
            store.save(&job("a", "u1")).await.unwrap();
            store.save(&job("b", "u2")).await.unwrap();
        }

        let fresh = CronJobStore::new(kv);
        assert_eq!(fresh.load_all().await.unwrap(), 2);
        assert_eq!(fresh.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_load_all_skips_corrupt_documents() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.put("cron/jobs/bad.json", b"not json").await.unwrap();
        let store = CronJobStore::new(kv);
        assert_eq!(store.load_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_for_user() {
        let store = store();
        store.save(&job("a", "u1")).await.unwrap();
        store.save(&job("b", "u1")).await.unwrap();
        store.save(&job("c", "u2")).await.unwrap();

        assert_eq!(store.list_for_user("u1").await.len(), 2);
        assert_eq!(store.list_for_user("u2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        let job = job("a", "u1");
        store.save(&job).await.unwrap();

        assert!(store.delete(&job.id).await.unwrap());
        assert!(!store.delete(&job.id).await.unwrap());
        assert!(store.get(&job.id).await.is_none());
    }
}
