//! Sync operations: likes, shares and single objects
//!
//! Each operation runs through the resilient client, so rate limits and
//! expired tokens are handled below this layer. Aggregated operations merge
//! their result into the record store once the last page is in.

use std::sync::{Arc, LazyLock};

use graph_client::{FetchAll, GraphClient, Page, Params};
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::records::{PostRecord, RecordStore};
use crate::resource::graph_id;

/// Page size requested for likes.
pub const LIKES_PAGE_LIMIT: u64 = 1000;

static FACEBOOK_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|m\.)?facebook\.com/(.+)$").expect("facebook url regex is valid")
});

/// Turn a facebook.com URL or a graph path into the path to request.
///
/// `pages/<name>/<id>` slugs resolve to `<id>`.
pub fn resolve_target(input: &str) -> Result<String> {
    let input = input.trim();
    let slug = match FACEBOOK_URL_RE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None if input.contains("://") || input.contains("facebook.com") => {
            return Err(Error::InvalidTarget(input.to_string()));
        }
        None => input.to_string(),
    };

    let slug = slug
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_matches('/')
        .to_string();
    if slug.is_empty() {
        return Err(Error::InvalidTarget(input.to_string()));
    }

    let parts: Vec<&str> = slug.split('/').collect();
    if slug.contains("pages") && parts.len() == 3 {
        return Ok(parts[2].to_string());
    }
    Ok(slug)
}

/// Outcome of an aggregated relation sync.
#[derive(Debug)]
pub struct RelationSync {
    /// Graph ids of the related resources, deduplicated, in response order
    pub ids: Vec<String>,
    /// Post counters after the merge, if a merge happened
    pub post: Option<PostRecord>,
}

pub struct Syncer {
    client: Arc<GraphClient>,
    records: Arc<RecordStore>,
    tag: Option<String>,
}

impl Syncer {
    pub fn new(client: Arc<GraphClient>, records: Arc<RecordStore>, tag: Option<String>) -> Self {
        Self { client, records, tag }
    }

    /// Fetch the users, pages and apps that liked `post_id`.
    ///
    /// With `all`, every page is fetched and the post's like set is replaced.
    pub async fn fetch_likes(&self, post_id: &str, all: bool) -> Result<RelationSync> {
        let method = format!("{post_id}/likes");
        let mut params = Params::new();
        params.insert("limit".into(), json!(LIKES_PAGE_LIMIT));

        let mut chain = self.client.chain(self.tag.as_deref());
        let records = &self.records;
        let mut merged = None;

        let ids = FetchAll::new()
            .all(all)
            .cursor_param("after")
            .run_merged(
                params,
                async |page_params: Params| -> Result<Page<String>> {
                    let after = page_params.get("after").cloned();
                    let page = Page::from_payload(chain.call(&method, page_params).await?)?;
                    debug!(method = %method, objects = page.records.len(), ?after, "likes page");
                    let resolved = records.get_or_create_all(&page.records).await?;
                    Ok(Page::new(resolved.into_iter().map(|r| r.graph_id).collect(), page.paging))
                },
                async |ids: Vec<String>, _: &Params| -> Result<Vec<String>> {
                    let ids = dedup(ids);
                    merged = Some(records.set_likes(post_id, &ids).await?);
                    Ok(ids)
                },
            )
            .await?;

        let ids = dedup(ids);
        metrics::counter!("graph_sync_records_total", "resource" => "likes").increment(ids.len() as u64);
        info!(post_id, likes = ids.len(), all, "likes synced");
        Ok(RelationSync { ids, post: merged })
    }

    /// Fetch the users who shared `post_id`.
    ///
    /// Shared posts are listed under the object id, the part after the last
    /// `_` of a `<owner>_<object>` post id. Only sharers given as a bare
    /// `{id, name}` are recorded.
    pub async fn fetch_shares(&self, post_id: &str, all: bool) -> Result<RelationSync> {
        let object_id = post_id.rsplit('_').next().unwrap_or(post_id);
        let method = format!("{object_id}/sharedposts");

        let mut chain = self.client.chain(self.tag.as_deref());
        let records = &self.records;
        let mut merged = None;

        let ids = FetchAll::new()
            .all(all)
            .cursor_param("after")
            .run_merged(
                Params::new(),
                async |page_params: Params| -> Result<Page<String>> {
                    let page = Page::from_payload(chain.call(&method, page_params).await?)?;
                    let sharers: Vec<&Value> = page.records.iter().filter_map(sharer).collect();
                    debug!(
                        method = %method,
                        objects = page.records.len(),
                        sharers = sharers.len(),
                        "shares page"
                    );
                    let resolved = records.get_or_create_all(sharers).await?;
                    Ok(Page::new(resolved.into_iter().map(|r| r.graph_id).collect(), page.paging))
                },
                async |ids: Vec<String>, _: &Params| -> Result<Vec<String>> {
                    let ids = dedup(ids);
                    merged = Some(records.set_shares(post_id, &ids).await?);
                    Ok(ids)
                },
            )
            .await?;

        let ids = dedup(ids);
        metrics::counter!("graph_sync_records_total", "resource" => "shares").increment(ids.len() as u64);
        info!(post_id, shares = ids.len(), all, "shares synced");
        Ok(RelationSync { ids, post: merged })
    }

    /// Fetch one object and store it under its graph id.
    pub async fn fetch_object(&self, target: &str) -> Result<(String, Value)> {
        let path = resolve_target(target)?;
        let object = self
            .client
            .call(&path, Params::new(), self.tag.as_deref())
            .await?;
        let id = object
            .get("id")
            .and_then(graph_id)
            .ok_or_else(|| Error::MissingId(object.clone()))?;

        let created = self.records.put_object(&id, object.clone()).await?;
        match self.records.get_or_create(&object).await {
            Ok(resource) => debug!(graph_id = %id, kind = resource.kind.label(), "object is a small resource"),
            Err(e) if e.is_skippable() => {}
            Err(e) => return Err(e),
        }
        metrics::counter!("graph_sync_records_total", "resource" => "object").increment(1);
        info!(path = %path, graph_id = %id, created, "object synced");
        Ok((id, object))
    }
}

/// `from` of a shared post, when it is a bare `{id, name}` user reference.
fn sharer(post: &Value) -> Option<&Value> {
    let from = post.get("from")?;
    let obj = from.as_object()?;
    (obj.len() == 2 && obj.contains_key("id") && obj.contains_key("name")).then_some(from)
}

/// Drop repeated ids, keeping first occurrence order.
fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
