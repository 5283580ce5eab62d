use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::auth::unix_now;
use crate::errors::ChanjingError;

const VOICE_CACHE_FILE: &str = "voice_clone.json";

/// One cloned voice, keyed by `<audio hash>_<model>` in the cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceCloneEntry {
    pub voice_id: String,
    pub model_type: String,
    /// Unix seconds.
    pub created_at: f64,
}

/// Maps (audio content hash, model) to the voice id a previous clone
/// produced. Entries never expire; they are only dropped when the platform
/// no longer accepts the id.
pub struct VoiceCloneCache {
    file: PathBuf,
    entries: Mutex<Option<HashMap<String, VoiceCloneEntry>>>,
}

impl VoiceCloneCache {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            file: cache_dir.join(VOICE_CACHE_FILE),
            entries: Mutex::new(None),
        }
    }

    fn key(file_hash: &str, model: &str) -> String {
        format!("{file_hash}_{model}")
    }

    pub async fn get(&self, file_hash: &str, model: &str) -> Option<String> {
        let mut guard = self.entries.lock().await;
        let entries = self.loaded(&mut guard).await;
        entries
            .get(&Self::key(file_hash, model))
            .map(|e| e.voice_id.clone())
    }

    pub async fn put(&self, file_hash: &str, model: &str, voice_id: &str) {
        let mut guard = self.entries.lock().await;
        let entries = self.loaded(&mut guard).await;
        entries.insert(
            Self::key(file_hash, model),
            VoiceCloneEntry {
                voice_id: voice_id.to_string(),
                model_type: model.to_string(),
                created_at: unix_now(),
            },
        );
        self.save(entries).await;
    }

    pub async fn remove(&self, file_hash: &str, model: &str) {
        let mut guard = self.entries.lock().await;
        let entries = self.loaded(&mut guard).await;
        if entries.remove(&Self::key(file_hash, model)).is_some() {
            self.save(entries).await;
        }
    }

    /// Lazily read the file once; a missing or corrupt file is an empty cache.
    async fn loaded<'a>(
        &self,
        guard: &'a mut Option<HashMap<String, VoiceCloneEntry>>,
    ) -> &'a mut HashMap<String, VoiceCloneEntry> {
        if guard.is_none() {
            let entries = match tokio::fs::read(&self.file).await {
                Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
                Err(_) => HashMap::new(),
            };
            *guard = Some(entries);
        }
        guard.get_or_insert_with(HashMap::new)
    }

    async fn save(&self, entries: &HashMap<String, VoiceCloneEntry>) {
        let write = async {
            if let Some(dir) = self.file.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&self.file, serde_json::to_vec_pretty(entries)?).await?;
            Ok::<_, ChanjingError>(())
        };
        if let Err(e) = write.await {
            warn!(error = %e, "failed to persist voice clone cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VoiceCloneCache::new(dir.path());

        assert_eq!(cache.get("abc", "cicada3.0").await, None);
        cache.put("abc", "cicada3.0", "voice-1").await;
        assert_eq!(cache.get("abc", "cicada3.0").await.as_deref(), Some("voice-1"));
        assert_eq!(cache.get("abc", "cicada1.0").await, None);

        cache.remove("abc", "cicada3.0").await;
        assert_eq!(cache.get("abc", "cicada3.0").await, None);
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        VoiceCloneCache::new(dir.path())
            .put("h", "cicada3.0-turbo", "voice-9")
            .await;

        let raw = std::fs::read_to_string(dir.path().join(VOICE_CACHE_FILE)).unwrap();
        assert!(raw.contains("h_cicada3.0-turbo"));

        let reopened = VoiceCloneCache::new(dir.path());
        assert_eq!(
            reopened.get("h", "cicada3.0-turbo").await.as_deref(),
            Some("voice-9")
        );
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VOICE_CACHE_FILE), "[[[").unwrap();
        let cache = VoiceCloneCache::new(dir.path());
        assert_eq!(cache.get("h", "m").await, None);
        cache.put("h", "m", "v").await;
        assert_eq!(cache.get("h", "m").await.as_deref(), Some("v"));
    }
}
