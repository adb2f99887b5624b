//! Local record store
//!
//! JSON file holding the resources seen in collections, per-post relation
//! sets, and raw objects. Same persistence scheme as the credential store:
//! the whole file is rewritten through a temp file and rename, serialized by
//! a tokio Mutex. Updates are applied to a copy that replaces the in-memory
//! state only once the write succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resource::SmallResource;

/// Relation sets and counters of one post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub likes: BTreeSet<String>,
    #[serde(default)]
    pub shares: BTreeSet<String>,
    #[serde(default)]
    pub likes_count: Option<u64>,
    #[serde(default)]
    pub shares_count: Option<u64>,
    #[serde(default)]
    pub comments_count: Option<u64>,
    #[serde(default)]
    pub actions_count: u64,
}

impl PostRecord {
    /// Recompute `actions_count`; unset counters count as zero.
    fn recount(&mut self) {
        self.actions_count = [self.likes_count, self.shares_count, self.comments_count]
            .iter()
            .map(|c| c.unwrap_or(0))
            .sum();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Records {
    #[serde(default)]
    resources: BTreeMap<String, SmallResource>,
    #[serde(default)]
    posts: BTreeMap<String, PostRecord>,
    #[serde(default)]
    objects: BTreeMap<String, Value>,
}

pub struct RecordStore {
    path: PathBuf,
    state: Mutex<Records>,
}

impl RecordStore {
    /// Load records from `path`, creating an empty file if it doesn't exist.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading record file: {e}")))?;
            let records: Records = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing record file: {e}")))?;
            info!(
                path = %path.display(),
                resources = records.resources.len(),
                posts = records.posts.len(),
                objects = records.objects.len(),
                "loaded records"
            );
            records
        } else {
            info!(path = %path.display(), "record file not found, starting empty");
            let records = Records::default();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Classify each value and create the resources not stored yet.
    ///
    /// Values of unknown shape are skipped. Returns the resolved resources in
    /// input order; existing records win over the incoming fields.
    pub async fn get_or_create_all<'v, I>(&self, values: I) -> Result<Vec<SmallResource>>
    where
        I: IntoIterator<Item = &'v Value>,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let mut resolved = Vec::new();
        let mut created = 0usize;

        for value in values {
            let resource = match SmallResource::classify(value) {
                Ok(resource) => resource,
                Err(e) if e.is_skippable() => {
                    debug!(error = %e, "skipping resource");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let stored = next
                .resources
                .entry(resource.graph_id.clone())
                .or_insert_with(|| {
                    created += 1;
                    debug!(graph_id = %resource.graph_id, kind = resource.kind.label(), "created resource");
                    resource
                });
            resolved.push(stored.clone());
        }

        if created > 0 {
            write_atomic(&self.path, &next).await?;
            *state = next;
        }
        Ok(resolved)
    }

    /// Single-value form of `get_or_create_all` that reports unknown shapes.
    pub async fn get_or_create(&self, value: &Value) -> Result<SmallResource> {
        SmallResource::classify(value)?;
        self.get_or_create_all([value])
            .await?
            .pop()
            .ok_or_else(|| Error::UnknownResourceType(value.clone()))
    }

    /// Replace the like set of `post_id` and set `likes_count` to its size.
    pub async fn set_likes(&self, post_id: &str, ids: &[String]) -> Result<PostRecord> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let post = next.posts.entry(post_id.to_string()).or_default();
        post.likes = ids.iter().cloned().collect();
        post.likes_count = Some(post.likes.len() as u64);
        post.recount();
        let post = post.clone();
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(post)
    }

    /// Replace the share set of `post_id`.
    ///
    /// `shares_count` is only set when unknown: the collection omits shares
    /// hidden by privacy settings, so an existing count is more accurate.
    pub async fn set_shares(&self, post_id: &str, ids: &[String]) -> Result<PostRecord> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let post = next.posts.entry(post_id.to_string()).or_default();
        post.shares = ids.iter().cloned().collect();
        if post.shares_count.is_none() {
            post.shares_count = Some(post.shares.len() as u64);
        }
        post.recount();
        let post = post.clone();
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(post)
    }

    /// Store a raw object under its graph id. Returns true if it is new.
    ///
    /// Summary counters on the object (`likes.summary.total_count`,
    /// `shares.count`, `comments.summary.total_count`, `like_count`) update
    /// the post counters when present.
    pub async fn put_object(&self, graph_id: &str, object: Value) -> Result<bool> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let counts = ObjectCounts::from_object(&object);
        let created = next.objects.insert(graph_id.to_string(), object).is_none();
        if !counts.is_empty() {
            let post = next.posts.entry(graph_id.to_string()).or_default();
            counts.apply(post);
            post.recount();
        }
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(created)
    }

    pub async fn resource(&self, graph_id: &str) -> Option<SmallResource> {
        self.state.lock().await.resources.get(graph_id).cloned()
    }

    pub async fn post(&self, graph_id: &str) -> Option<PostRecord> {
        self.state.lock().await.posts.get(graph_id).cloned()
    }

    pub async fn object(&self, graph_id: &str) -> Option<Value> {
        self.state.lock().await.objects.get(graph_id).cloned()
    }
}

#[derive(Debug, Default)]
struct ObjectCounts {
    likes: Option<u64>,
    shares: Option<u64>,
    comments: Option<u64>,
}

impl ObjectCounts {
    fn from_object(object: &Value) -> Self {
        let total = |key: &str| object.pointer(&format!("/{key}/summary/total_count")).and_then(Value::as_u64);
        Self {
            likes: total("likes").or_else(|| object.get("like_count").and_then(Value::as_u64)),
            shares: object.pointer("/shares/count").and_then(Value::as_u64),
            comments: total("comments"),
        }
    }

    fn is_empty(&self) -> bool {
        self.likes.is_none() && self.shares.is_none() && self.comments.is_none()
    }

    fn apply(&self, post: &mut PostRecord) {
        if self.likes.is_some() {
            post.likes_count = self.likes;
        }
        if self.shares.is_some() {
            post.shares_count = self.shares;
        }
        if self.comments.is_some() {
            post.comments_count = self.comments;
        }
    }
}

async fn write_atomic(path: &Path, data: &Records) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing records: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("record path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".records.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp record file: {e}")))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp record file: {e}")))?;

    debug!(path = %path.display(), "persisted records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use serde_json::json;

    async fn store(dir: &tempfile::TempDir) -> RecordStore {
        RecordStore::load(dir.path().join("records.json")).await.unwrap()
    }

    #[tokio::test]
    async fn get_or_create_keeps_first_seen_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let first = store.get_or_create(&json!({"id": "1", "name": "Jane"})).await.unwrap();
        let again = store.get_or_create(&json!({"id": "1", "name": "Jane Doe"})).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(again.fields.get("name"), Some(&json!("Jane")));
        assert_eq!(again.kind, ResourceKind::User);
    }

    #[tokio::test]
    async fn get_or_create_reports_unknown_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let err = store
            .get_or_create(&json!({"id": "1", "message": "hi"}))
            .await
            .unwrap_err();
        assert!(err.is_skippable(), "got {err:?}");
    }

    #[tokio::test]
    async fn get_or_create_all_skips_unknown_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let values = [
            json!({"id": "1", "name": "Jane"}),
            json!({"id": "2", "message": "not a small resource"}),
            json!({"id": "3", "name": "App", "namespace": "app"}),
        ];
        let resolved = store.get_or_create_all(&values).await.unwrap();
        let ids: Vec<&str> = resolved.iter().map(|r| r.graph_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert!(store.resource("2").await.is_none());
    }

    #[tokio::test]
    async fn records_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        {
            let store = RecordStore::load(path.clone()).await.unwrap();
            store.get_or_create(&json!({"id": "1"})).await.unwrap();
            store.set_likes("10_20", &["1".to_string()]).await.unwrap();
        }
        let store = RecordStore::load(path).await.unwrap();
        assert!(store.resource("1").await.is_some());
        assert_eq!(store.post("10_20").await.unwrap().likes_count, Some(1));
    }

    #[tokio::test]
    async fn set_likes_replaces_set_and_recounts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store
            .set_likes("p", &["1".into(), "2".into(), "3".into()])
            .await
            .unwrap();
        let post = store.set_likes("p", &["2".into(), "4".into(), "4".into()]).await.unwrap();
        assert_eq!(post.likes.iter().collect::<Vec<_>>(), vec!["2", "4"]);
        assert_eq!(post.likes_count, Some(2));
        assert_eq!(post.actions_count, 2);
    }

    #[tokio::test]
    async fn set_shares_keeps_existing_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let post = store.set_shares("p", &["1".into(), "2".into()]).await.unwrap();
        assert_eq!(post.shares_count, Some(2));

        let post = store.set_shares("p", &["1".into()]).await.unwrap();
        assert_eq!(post.shares.len(), 1);
        assert_eq!(post.shares_count, Some(2));
    }

    #[tokio::test]
    async fn actions_count_sums_all_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store
            .put_object(
                "p",
                json!({
                    "id": "p",
                    "shares": {"count": 4},
                    "comments": {"data": [], "summary": {"total_count": 6}}
                }),
            )
            .await
            .unwrap();
        let post = store.set_likes("p", &["1".into(), "2".into()]).await.unwrap();
        assert_eq!(post.shares_count, Some(4));
        assert_eq!(post.comments_count, Some(6));
        assert_eq!(post.actions_count, 12);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.set_likes("p", &["1".into()]).await.unwrap();

        // A directory in place of the file makes the rename fail
        let path = dir.path().join("records.json");
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let err = store.set_likes("p", &["1".into(), "2".into()]).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)), "got {err:?}");
        assert_eq!(store.post("p").await.unwrap().likes_count, Some(1));

        let err = store.get_or_create_all(&[json!({"id": "9"})]).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)), "got {err:?}");
        assert!(store.resource("9").await.is_none());
    }

    #[tokio::test]
    async fn put_object_reports_creation() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        assert!(store.put_object("1", json!({"id": "1", "name": "a"})).await.unwrap());
        assert!(!store.put_object("1", json!({"id": "1", "name": "b"})).await.unwrap());
        assert_eq!(store.object("1").await.unwrap()["name"], "b");
        assert!(store.post("1").await.is_none());
    }
}
