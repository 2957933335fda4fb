use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

use super::provider::{DirectoryError, DirectoryEvent, DynKeyDirectory, RecipientKeyRecord};

/// Read-through cache of recipient keys per user
///
/// Pending directory events are drained before every lookup and evict the
/// users they mention. If the event channel lagged, the whole cache is dropped.
/// No lock is held while the directory is queried.
#[derive(Debug)]
pub struct RecipientCache {
    directory: DynKeyDirectory,
    state: Mutex<CacheState>,
}

#[derive(Debug)]
struct CacheState {
    events: Receiver<DirectoryEvent>,
    users: HashMap<String, Vec<RecipientKeyRecord>>,
}

impl CacheState {
    fn invalidate_pending(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.users.remove(event.user_id());
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "recipient cache lagged, clearing");
                    self.users.clear();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

impl RecipientCache {
    pub fn new(directory: DynKeyDirectory) -> Self {
        let events = directory.subscribe();
        Self {
            directory,
            state: Mutex::new(CacheState {
                events,
                users: HashMap::new(),
            }),
        }
    }

    pub fn directory(&self) -> &DynKeyDirectory {
        &self.directory
    }

    /// Every device key of every listed user
    pub async fn resolve(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<RecipientKeyRecord>, DirectoryError> {
        let mut unique: Vec<String> = user_ids.to_vec();
        unique.sort();
        unique.dedup();

        let missing: Vec<String> = {
            let mut state = self.lock()?;
            state.invalidate_pending();
            unique
                .iter()
                .filter(|u| !state.users.contains_key(*u))
                .cloned()
                .collect()
        };

        if !missing.is_empty() {
            let fetched = self.directory.list_for_users(&missing).await?;
            let mut by_user: HashMap<String, Vec<RecipientKeyRecord>> =
                missing.iter().map(|u| (u.clone(), Vec::new())).collect();
            for record in fetched {
                by_user.entry(record.user_id.clone()).or_default().push(record);
            }
            let mut state = self.lock()?;
            state.users.extend(by_user);
        }

        let state = self.lock()?;
        Ok(unique
            .iter()
            .filter_map(|u| state.users.get(u))
            .flat_map(|records| records.iter().cloned())
            .collect())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheState>, DirectoryError> {
        self.state
            .lock()
            .map_err(|e| DirectoryError::Provider(format!("recipient cache poisoned: {}", e)))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::crypto::SecretKey;
    use crate::directory::{KeyDirectory, MemoryKeyDirectory};

    fn record(user: &str, device: &str) -> RecipientKeyRecord {
        RecipientKeyRecord::new(user, device, SecretKey::generate().unwrap().public())
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_change() {
        let directory = Arc::new(MemoryKeyDirectory::default());
        let cache = RecipientCache::new(directory.clone());

        directory.register(record("alice", "laptop")).await.unwrap();
        let team = vec!["alice".to_string(), "bob".to_string()];
        assert_eq!(cache.resolve(&team).await.unwrap().len(), 1);

        directory.register(record("bob", "desktop")).await.unwrap();
        directory.register(record("alice", "phone")).await.unwrap();
        assert_eq!(cache.resolve(&team).await.unwrap().len(), 3);

        directory.remove("alice", "laptop").await.unwrap();
        let devices: Vec<String> = cache
            .resolve(&team)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.device_id)
            .collect();
        assert_eq!(devices, vec!["phone".to_string(), "desktop".to_string()]);
    }
}
