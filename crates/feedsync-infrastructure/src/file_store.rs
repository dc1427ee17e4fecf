//! Directory-backed [`ContentStore`].
//!
//! Directory structure:
//! ```text
//! store_dir/
//! ├── .lock
//! ├── content/     one payload per file
//! ├── shared/      one shared state per file, never rewritten
//! ├── semantic/    one semantic property blob per file
//! └── sessions/    one structural journal per session
//! ```
//!
//! File names are the URL-safe base64 of the key plus `.json`. Keys whose
//! encoded name would be too long for the file system are stored under `~`
//! followed by the base64 SHA-256 of the key instead. Every file holds its key
//! next to the value, and is replaced atomically; a commit that touches
//! several files is atomic per file.

use crate::storage::{AtomicJsonFile, StoreLock};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use feedsync_core::error::{FeedError, Result};
use feedsync_core::store::{ContentMutation, ContentStore, SessionMutation};
use feedsync_core::stream::{
    ContentId, PayloadWithId, SessionId, SharedState, StreamPayload, StructuralOperation,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

const CONTENT_DIR: &str = "content";
const SHARED_DIR: &str = "shared";
const SEMANTIC_DIR: &str = "semantic";
const SESSIONS_DIR: &str = "sessions";
const LOCK_FILE: &str = ".lock";
const EXTENSION: &str = "json";
const HASHED_PREFIX: char = '~';
/// Longest encoded key used verbatim; leaves room for the extension and the
/// temp-file decoration within a 255-byte file name.
const MAX_ENCODED_KEY: usize = 200;

#[derive(Serialize, Deserialize)]
struct Record<T> {
    key: String,
    value: T,
}

#[derive(Serialize, Deserialize)]
struct RecordKey {
    key: String,
}

/// One keyed file. A record whose stored key differs from `key` reads as absent.
struct Entry<T> {
    key: String,
    file: AtomicJsonFile<Record<T>>,
}

impl<T> Entry<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>> {
        Ok(self
            .file
            .load()?
            .filter(|record| record.key == self.key)
            .map(|record| record.value))
    }

    fn save(&self, value: T) -> Result<()> {
        self.file.save(&Record {
            key: self.key.clone(),
            value,
        })
    }

    fn update<F>(&self, default_value: T, f: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        let mut value = self.load()?.unwrap_or(default_value);
        f(&mut value);
        self.save(value)
    }

    fn exists(&self) -> bool {
        self.file.exists()
    }

    fn remove(&self) -> Result<bool> {
        self.file.remove()
    }
}

struct Layout {
    root: PathBuf,
}

impl Layout {
    fn file(&self, dir: &str, key: &str) -> PathBuf {
        self.root
            .join(dir)
            .join(format!("{}.{}", file_stem(key), EXTENSION))
    }

    fn entry<T>(&self, dir: &str, key: &str) -> Entry<T>
    where
        T: Serialize + DeserializeOwned,
    {
        Entry {
            key: key.to_string(),
            file: AtomicJsonFile::new(self.file(dir, key)),
        }
    }

    /// Lists the keys of every entry in `dir`. Stray files are skipped.
    fn keys(&self, dir: &str) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.root.join(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let key = if stem.starts_with(HASHED_PREFIX) {
                AtomicJsonFile::<RecordKey>::new(path.clone())
                    .load()?
                    .map(|record| record.key)
            } else {
                decode_key(stem)
            };
            match key {
                Some(key) => keys.push(key),
                None => tracing::warn!(
                    "[FileContentStore] Ignoring undecodable file {}",
                    path.display()
                ),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn file_stem(key: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(key.as_bytes());
    if encoded.len() <= MAX_ENCODED_KEY {
        return encoded;
    }
    let digest = Sha256::digest(key.as_bytes());
    format!("{}{}", HASHED_PREFIX, URL_SAFE_NO_PAD.encode(digest))
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

/// Content store persisted as one JSON file per key under a directory.
///
/// The directory is locked exclusively while the store is open, so only one
/// process writes to it at a time.
pub struct FileContentStore {
    layout: Arc<Layout>,
    _lock: StoreLock,
}

impl FileContentStore {
    /// Opens (creating if needed) the store at `dir` and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Io` if the directory cannot be created or is
    /// already locked by another store.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        for sub in [CONTENT_DIR, SHARED_DIR, SEMANTIC_DIR, SESSIONS_DIR] {
            fs::create_dir_all(root.join(sub))?;
        }
        let lock = StoreLock::acquire(root.join(LOCK_FILE))?;

        tracing::debug!("[FileContentStore] Opened {}", root.display());
        Ok(Self {
            layout: Arc::new(Layout { root }),
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Layout) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let layout = self.layout.clone();
        task::spawn_blocking(move || f(&layout))
            .await
            .map_err(|e| FeedError::io(format!("Failed to spawn blocking task: {}", e)))?
    }
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn get_payloads(&self, ids: &[ContentId]) -> Result<Vec<PayloadWithId>> {
        let ids = ids.to_vec();
        self.blocking(move |layout| {
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                let file = layout.entry::<StreamPayload>(CONTENT_DIR, id.as_str());
                if let Some(payload) = file.load()? {
                    found.push(PayloadWithId {
                        content_id: id,
                        payload,
                    });
                }
            }
            Ok(found)
        })
        .await
    }

    async fn get_all_shared_states(&self) -> Result<Vec<(ContentId, SharedState)>> {
        self.blocking(|layout| {
            let mut states = Vec::new();
            for key in layout.keys(SHARED_DIR)? {
                if let Some(state) = layout.entry::<SharedState>(SHARED_DIR, &key).load()? {
                    states.push((ContentId::from(key), state));
                }
            }
            Ok(states)
        })
        .await
    }

    async fn get_stream_structures(&self, session_id: &SessionId) -> Result<Vec<StructuralOperation>> {
        let session_id = session_id.clone();
        self.blocking(move |layout| {
            let journal = layout
                .entry::<Vec<StructuralOperation>>(SESSIONS_DIR, session_id.as_str())
                .load()?;
            Ok(journal.unwrap_or_default())
        })
        .await
    }

    async fn get_all_sessions(&self) -> Result<Vec<SessionId>> {
        self.blocking(|layout| {
            Ok(layout
                .keys(SESSIONS_DIR)?
                .into_iter()
                .map(SessionId::new)
                .collect())
        })
        .await
    }

    async fn commit_session(&self, mutation: SessionMutation) -> Result<()> {
        self.blocking(move |layout| {
            let file = layout
                .entry::<Vec<StructuralOperation>>(SESSIONS_DIR, mutation.session_id().as_str());
            let clears = mutation.clears_journal();
            file.update(Vec::new(), |journal| {
                if clears {
                    journal.clear();
                }
                journal.extend(mutation.operations().iter().cloned());
            })
        })
        .await
    }

    async fn commit_content(&self, mutation: ContentMutation) -> Result<()> {
        let (payloads, shared_states) = mutation.into_parts();
        self.blocking(move |layout| {
            for PayloadWithId { content_id, payload } in payloads {
                layout
                    .entry::<StreamPayload>(CONTENT_DIR, content_id.as_str())
                    .save(payload)?;
            }
            for (id, state) in shared_states {
                let file = layout.entry::<SharedState>(SHARED_DIR, id.as_str());
                if file.exists() {
                    tracing::debug!(content_id = %id, "[FileContentStore] Shared state already stored");
                    continue;
                }
                file.save(state)?;
            }
            Ok(())
        })
        .await
    }

    async fn get_semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<(ContentId, Vec<u8>)>> {
        let ids = ids.to_vec();
        self.blocking(move |layout| {
            let mut found = Vec::new();
            for id in ids {
                if let Some(bytes) = layout.entry::<Vec<u8>>(SEMANTIC_DIR, id.as_str()).load()? {
                    found.push((id, bytes));
                }
            }
            Ok(found)
        })
        .await
    }

    async fn commit_semantic_properties(&self, properties: Vec<(ContentId, Vec<u8>)>) -> Result<()> {
        self.blocking(move |layout| {
            for (id, bytes) in properties {
                layout
                    .entry::<Vec<u8>>(SEMANTIC_DIR, id.as_str())
                    .save(bytes)?;
            }
            Ok(())
        })
        .await
    }

    async fn remove_session(&self, session_id: &SessionId) -> Result<()> {
        let session_id = session_id.clone();
        self.blocking(move |layout| {
            layout
                .entry::<Vec<StructuralOperation>>(SESSIONS_DIR, session_id.as_str())
                .remove()?;
            Ok(())
        })
        .await
    }

    async fn gc_content(&self, keep: &HashSet<ContentId>) -> Result<usize> {
        let keep = keep.clone();
        self.blocking(move |layout| {
            let descriptors = ContentId::session_descriptors();
            let mut removed = 0;
            for key in layout.keys(CONTENT_DIR)? {
                let id = ContentId::from(key);
                if id == descriptors || keep.contains(&id) {
                    continue;
                }
                if layout.entry::<StreamPayload>(CONTENT_DIR, id.as_str()).remove()? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn append(id: &str) -> StructuralOperation {
        StructuralOperation::append(id, Some(ContentId::from("root")))
    }

    #[tokio::test]
    async fn journals_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let session = SessionId::from("session:1/with slash");
        {
            let store = FileContentStore::open(temp_dir.path()).unwrap();
            let mut mutation = SessionMutation::new(session.clone());
            mutation.add(append("a")).add(append("b"));
            store.commit_session(mutation).await.unwrap();
        }

        let store = FileContentStore::open(temp_dir.path()).unwrap();
        assert_eq!(
            store.get_stream_structures(&session).await.unwrap(),
            vec![append("a"), append("b")]
        );
        assert_eq!(store.get_all_sessions().await.unwrap(), vec![session.clone()]);

        let mut reset = SessionMutation::new(session.clone());
        reset.clear().add(append("c"));
        store.commit_session(reset).await.unwrap();
        assert_eq!(store.get_stream_structures(&session).await.unwrap(), vec![append("c")]);

        store.remove_session(&session).await.unwrap();
        store.remove_session(&session).await.unwrap();
        assert!(store.get_all_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_open_is_refused_while_locked() {
        let temp_dir = TempDir::new().unwrap();
        let _store = FileContentStore::open(temp_dir.path()).unwrap();

        let err = FileContentStore::open(temp_dir.path()).err().unwrap();
        assert!(err.is_io());
    }

    #[tokio::test]
    async fn payloads_shared_states_and_gc() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileContentStore::open(temp_dir.path()).unwrap();

        let mut mutation = ContentMutation::new();
        mutation
            .add("a".into(), StreamPayload::styled_feature(b"a".to_vec(), "style"))
            .add("b".into(), StreamPayload::Token { bytes: b"t".to_vec() })
            .add(ContentId::session_descriptors(), StreamPayload::Record { bytes: b"{}".to_vec() })
            .add_shared_state("style".into(), SharedState { bytes: b"v1".to_vec() });
        store.commit_content(mutation).await.unwrap();

        let mut rewrite = ContentMutation::new();
        rewrite.add_shared_state("style".into(), SharedState { bytes: b"v2".to_vec() });
        store.commit_content(rewrite).await.unwrap();
        assert_eq!(
            store.get_all_shared_states().await.unwrap(),
            vec![(ContentId::from("style"), SharedState { bytes: b"v1".to_vec() })]
        );

        let found = store.get_payloads(&["a".into(), "missing".into()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content_id, ContentId::from("a"));

        let keep: HashSet<ContentId> = [ContentId::from("a")].into_iter().collect();
        assert_eq!(store.gc_content(&keep).await.unwrap(), 1);
        assert!(store.get_payloads(&["b".into()]).await.unwrap().is_empty());
        assert_eq!(
            store
                .get_payloads(&[ContentId::session_descriptors()])
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.get_all_shared_states().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn semantic_properties_round_trip_per_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileContentStore::open(temp_dir.path()).unwrap();

        store
            .commit_semantic_properties(vec![("a".into(), vec![1, 2]), ("b".into(), vec![3])])
            .await
            .unwrap();
        store
            .commit_semantic_properties(vec![("a".into(), vec![9])])
            .await
            .unwrap();

        let found = store
            .get_semantic_properties(&["a".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(found, vec![(ContentId::from("a"), vec![9])]);
    }

    #[tokio::test]
    async fn long_content_ids_are_stored_under_digest_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileContentStore::open(temp_dir.path()).unwrap();
        let long = ContentId::from(format!("feature::{}", "x".repeat(400)));

        let mut mutation = ContentMutation::new();
        mutation
            .add(long.clone(), StreamPayload::feature(b"long".to_vec()))
            .add("short".into(), StreamPayload::feature(b"short".to_vec()));
        store.commit_content(mutation).await.unwrap();

        let found = store
            .get_payloads(&[long.clone(), "short".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].content_id, long);
        assert_eq!(found[0].payload, StreamPayload::feature(b"long".to_vec()));

        let mut journal = SessionMutation::new(SessionId::new(long.as_str()));
        journal.add(append("a"));
        store.commit_session(journal).await.unwrap();
        assert_eq!(
            store.get_all_sessions().await.unwrap(),
            vec![SessionId::new(long.as_str())]
        );

        let keep: HashSet<ContentId> = [long.clone()].into_iter().collect();
        assert_eq!(store.gc_content(&keep).await.unwrap(), 1);
        assert_eq!(store.get_payloads(&[long]).await.unwrap().len(), 1);
    }

    #[test]
    fn file_names_round_trip_through_base64() {
        let layout = Layout {
            root: PathBuf::from("/store"),
        };
        let path = layout.file(CONTENT_DIR, "feature/1?x");
        let stem = path.file_stem().unwrap().to_str().unwrap();
        assert!(!stem.contains('/'));
        assert_eq!(decode_key(stem).as_deref(), Some("feature/1?x"));

        let long = "k".repeat(300);
        let name = layout.file(CONTENT_DIR, &long);
        let name = name.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(HASHED_PREFIX));
        assert!(name.len() < 64);
    }
}
