//! Cursor-following aggregation over paginated collections
//!
//! A Graph collection page looks like
//! `{"data": [...], "paging": {"cursors": {"before", "after"}, "next": "<url>"}}`.
//! `FetchAll` calls a page operation repeatedly, feeding back the cursor of
//! each page, until a page arrives without a `next` indicator. The cursor is
//! read from `paging.cursors` first and from the query string of the `next`
//! URL otherwise.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use transport::Params;

use crate::error::{Error, Result};

/// Query parameter name captured from a next URL, e.g. `after=QVFIUm`.
static QUERY_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[?&]([^=&#]+)=([^&#]*)").expect("query param regex is valid")
});

/// Alternate query names some endpoints use for a cursor.
const CURSOR_ALIASES: &[(&str, &str)] = &[("after", "__after_id"), ("before", "__before_id")];

/// Pagination metadata of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paging {
    pub next: Option<String>,
    pub previous: Option<String>,
    pub cursors: Map<String, Value>,
}

impl Paging {
    /// Parse the `paging` object of a page.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Pagination(format!("paging is not an object: {value}")))?;
        let cursors = match obj.get("cursors") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(cursors)) => cursors.clone(),
            Some(other) => {
                return Err(Error::Pagination(format!("paging.cursors is not an object: {other}")));
            }
        };
        Ok(Self {
            next: link(obj, "next")?,
            previous: link(obj, "previous")?,
            cursors,
        })
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Cursor value for `name`.
    ///
    /// Checks `cursors.<name>`, then `<name>` in the next URL, then known
    /// aliases of `<name>` in the next URL.
    pub fn cursor(&self, name: &str) -> Option<String> {
        if let Some(value) = self.cursors.get(name) {
            match value {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }

        let next = self.next.as_deref()?;
        if let Some(value) = query_value(next, name) {
            return Some(value);
        }
        CURSOR_ALIASES
            .iter()
            .filter(|(cursor, _)| *cursor == name)
            .find_map(|(_, alias)| query_value(next, alias))
    }
}

fn link(obj: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(Error::Pagination(format!("paging.{key} is not a string: {other}"))),
    }
}

/// Decoded value of query parameter `name` in `url`.
fn query_value(url: &str, name: &str) -> Option<String> {
    QUERY_PARAM_RE
        .captures_iter(url)
        .find(|caps| &caps[1] == name)
        .and_then(|caps| {
            let raw = caps.get(2)?.as_str();
            if raw.is_empty() {
                return None;
            }
            let decoded = urlencoding::decode(raw).ok()?;
            Some(decoded.into_owned())
        })
}

/// One page of records plus its pagination metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub paging: Option<Paging>,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, paging: Option<Paging>) -> Self {
        Self { records, paging }
    }

    /// A page with no further pages.
    pub fn last(records: Vec<T>) -> Self {
        Self::new(records, None)
    }
}

impl Page<Value> {
    /// Split a Graph collection payload into records and paging.
    ///
    /// A payload without a `data` array is malformed.
    pub fn from_payload(payload: Value) -> Result<Self> {
        let Value::Object(mut obj) = payload else {
            return Err(Error::MalformedPage(format!("expected an object, got {payload}")));
        };
        let records = match obj.remove("data") {
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(Error::MalformedPage(format!("data is not an array: {other}")));
            }
            None => return Err(Error::MalformedPage("missing data".into())),
        };
        let paging = match obj.get("paging") {
            None | Some(Value::Null) => None,
            Some(value) => Some(Paging::from_value(value)?),
        };
        Ok(Self { records, paging })
    }
}

/// Aggregation options for a paginated operation.
///
/// Without `all` (or `always_all`) the operation is a pass-through: one page
/// is fetched and its records returned as-is.
#[derive(Debug, Clone)]
pub struct FetchAll {
    all: bool,
    always_all: bool,
    cursor_param: String,
}

impl Default for FetchAll {
    fn default() -> Self {
        Self {
            all: false,
            always_all: false,
            cursor_param: "after".to_string(),
        }
    }
}

impl FetchAll {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-call request to aggregate every page.
    pub fn all(mut self, all: bool) -> Self {
        self.all = all;
        self
    }

    /// Aggregate regardless of the per-call flag.
    pub fn always_all(mut self) -> Self {
        self.always_all = true;
        self
    }

    /// Parameter carrying the cursor into the next request.
    pub fn cursor_param(mut self, name: impl Into<String>) -> Self {
        self.cursor_param = name.into();
        self
    }

    pub fn aggregates(&self) -> bool {
        self.all || self.always_all
    }

    /// Run `page_fn` once, or until the last page when aggregating.
    ///
    /// `page_fn` may fail with any error type that pagination errors convert
    /// into.
    pub async fn run<T, E, F>(&self, params: Params, page_fn: F) -> std::result::Result<Vec<T>, E>
    where
        E: From<Error>,
        F: AsyncFnMut(Params) -> std::result::Result<Page<T>, E>,
    {
        let keep = async |records: Vec<T>, _: &Params| -> std::result::Result<Vec<T>, E> { Ok(records) };
        self.run_merged(params, page_fn, keep).await
    }

    /// Like `run`, then hand the aggregated records and the original params
    /// to `merge`. `merge` is skipped on the pass-through path.
    pub async fn run_merged<T, E, F, M>(
        &self,
        params: Params,
        mut page_fn: F,
        merge: M,
    ) -> std::result::Result<Vec<T>, E>
    where
        E: From<Error>,
        F: AsyncFnMut(Params) -> std::result::Result<Page<T>, E>,
        M: AsyncFnOnce(Vec<T>, &Params) -> std::result::Result<Vec<T>, E>,
    {
        if !self.aggregates() {
            return Ok(page_fn(params).await?.records);
        }

        let original = params.clone();
        let mut params = params;
        let mut records = Vec::new();
        let mut pages: u32 = 0;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        loop {
            let page = page_fn(params.clone()).await?;
            pages += 1;
            records.extend(page.records);

            let Some(paging) = page.paging.filter(Paging::has_next) else {
                debug!(pages, records = records.len(), "pagination complete");
                break;
            };

            let Some(cursor) = paging.cursor(&self.cursor_param) else {
                return Err(Error::Pagination(format!(
                    "page {pages} has a next link but no '{}' cursor: {:?}",
                    self.cursor_param, paging.next
                ))
                .into());
            };
            if !seen_cursors.insert(cursor.clone()) {
                return Err(Error::Pagination(format!("page {pages} repeats cursor '{cursor}'")).into());
            }

            params.insert(self.cursor_param.clone(), Value::String(cursor));
        }

        merge(records, &original).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(start: usize, n: usize) -> Vec<Value> {
        (start..start + n).map(|i| json!({"id": i.to_string()})).collect()
    }

    fn paging(after: &str) -> Option<Paging> {
        Some(Paging {
            next: Some(format!("https://graph.facebook.com/v2.3/1/likes?limit=10&after={after}")),
            previous: None,
            cursors: json!({"before": "B", "after": after}).as_object().cloned().unwrap_or_default(),
        })
    }

    /// Pages of 10, 10 and 4 records, keyed by the incoming cursor.
    fn three_pages(params: &Params) -> Page<Value> {
        match params.get("after").and_then(Value::as_str) {
            None => Page::new(records(0, 10), paging("c1")),
            Some("c1") => Page::new(records(10, 10), paging("c2")),
            Some("c2") => Page::last(records(20, 4)),
            Some(other) => panic!("unexpected cursor {other}"),
        }
    }

    #[tokio::test]
    async fn aggregates_every_page() {
        let mut calls = 0;
        let seen = FetchAll::new()
            .all(true)
            .run(Params::new(), async |params: Params| -> Result<Page<Value>> {
                calls += 1;
                Ok(three_pages(&params))
            })
            .await
            .unwrap();

        assert_eq!(seen.len(), 24);
        assert_eq!(calls, 3);
        assert_eq!(seen[0]["id"], "0");
        assert_eq!(seen[23]["id"], "23");
    }

    #[tokio::test]
    async fn identical_scripts_give_identical_results() {
        let fetch = FetchAll::new().all(true);
        let first = fetch
            .run(Params::new(), async |params: Params| -> Result<Page<Value>> { Ok(three_pages(&params)) })
            .await
            .unwrap();
        let second = fetch
            .run(Params::new(), async |params: Params| -> Result<Page<Value>> { Ok(three_pages(&params)) })
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_collection() {
        let seen = FetchAll::new()
            .all(true)
            .run(Params::new(), async |_: Params| -> Result<Page<Value>> { Ok(Page::last(Vec::new())) })
            .await
            .unwrap();
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn always_all_aggregates_without_flag() {
        let seen = FetchAll::new()
            .always_all()
            .run(Params::new(), async |params: Params| -> Result<Page<Value>> { Ok(three_pages(&params)) })
            .await
            .unwrap();
        assert_eq!(seen.len(), 24);
    }

    #[tokio::test]
    async fn single_page_passes_through() {
        let mut calls = 0;
        let seen = FetchAll::new()
            .run(Params::new(), async |params: Params| -> Result<Page<Value>> {
                calls += 1;
                Ok(three_pages(&params))
            })
            .await
            .unwrap();
        assert_eq!(seen, records(0, 10));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn merge_runs_once_with_original_params() {
        let mut params = Params::new();
        params.insert("limit".into(), json!(10));
        let mut merged_with = None;

        let seen = FetchAll::new()
            .all(true)
            .run_merged(
                params,
                async |params: Params| -> Result<Page<Value>> { Ok(three_pages(&params)) },
                async |records: Vec<Value>, original: &Params| -> Result<Vec<Value>> {
                    merged_with = Some(original.clone());
                    Ok(records.into_iter().take(5).collect())
                },
            )
            .await
            .unwrap();

        assert_eq!(seen.len(), 5);
        let original = merged_with.unwrap();
        assert_eq!(original.get("limit"), Some(&json!(10)));
        assert!(!original.contains_key("after"));
    }

    #[tokio::test]
    async fn merge_skipped_without_aggregation() {
        let mut merged = false;
        let seen = FetchAll::new()
            .run_merged(
                Params::new(),
                async |params: Params| -> Result<Page<Value>> { Ok(three_pages(&params)) },
                async |records: Vec<Value>, _: &Params| -> Result<Vec<Value>> {
                    merged = true;
                    Ok(records)
                },
            )
            .await
            .unwrap();
        assert_eq!(seen.len(), 10);
        assert!(!merged);
    }

    #[tokio::test]
    async fn next_without_cursor_is_fatal() {
        let err = FetchAll::new()
            .all(true)
            .run(Params::new(), async |_: Params| -> Result<Page<Value>> {
                Ok(Page::new(
                    records(0, 2),
                    Some(Paging {
                        next: Some("https://graph.facebook.com/v2.3/1/likes?limit=2".into()),
                        ..Paging::default()
                    }),
                ))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Pagination(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn repeated_cursor_is_fatal() {
        let mut calls = 0;
        let err = FetchAll::new()
            .all(true)
            .run(Params::new(), async |_: Params| -> Result<Page<Value>> {
                calls += 1;
                Ok(Page::new(records(0, 1), paging("same")))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Pagination(_)), "got {err:?}");
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn cursor_cycle_is_fatal() {
        let mut calls = 0;
        let err = FetchAll::new()
            .all(true)
            .run(Params::new(), async |params: Params| -> Result<Page<Value>> {
                calls += 1;
                let next = match params.get("after").and_then(Value::as_str) {
                    Some("A") => "B",
                    _ => "A",
                };
                Ok(Page::new(records(0, 1), paging(next)))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Pagination(_)), "got {err:?}");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn page_errors_propagate() {
        let err = FetchAll::new()
            .all(true)
            .run(Params::new(), async |params: Params| -> Result<Page<Value>> {
                if params.contains_key("after") {
                    Err(Error::MalformedPage("missing data".into()))
                } else {
                    Ok(Page::new(records(0, 1), paging("c1")))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPage(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn custom_cursor_param() {
        let seen = FetchAll::new()
            .all(true)
            .cursor_param("until")
            .run(Params::new(), async |params: Params| -> Result<Page<Value>> {
                Ok(match params.get("until") {
                    None => Page::new(
                        records(0, 3),
                        Some(Paging {
                            next: Some("https://graph.facebook.com/1/feed?limit=3&until=1364849754".into()),
                            ..Paging::default()
                        }),
                    ),
                    Some(_) => Page::last(records(3, 1)),
                })
            })
            .await
            .unwrap();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn cursor_prefers_structured_value() {
        let p = Paging {
            next: Some("https://graph.facebook.com/1/likes?after=from-url".into()),
            previous: None,
            cursors: json!({"after": "from-cursors"}).as_object().cloned().unwrap(),
        };
        assert_eq!(p.cursor("after").as_deref(), Some("from-cursors"));
    }

    #[test]
    fn cursor_falls_back_to_url_and_decodes() {
        let p = Paging {
            next: Some("https://graph.facebook.com/1/likes?limit=25&after=QVFI%3D%3D&fields=id".into()),
            ..Paging::default()
        };
        assert_eq!(p.cursor("after").as_deref(), Some("QVFI=="));
    }

    #[test]
    fn cursor_falls_back_to_alias() {
        let p = Paging {
            next: Some("https://graph.facebook.com/1/comments?limit=25&__after_id=enc_AdB".into()),
            ..Paging::default()
        };
        assert_eq!(p.cursor("after").as_deref(), Some("enc_AdB"));
        assert_eq!(p.cursor("until"), None);
    }

    #[test]
    fn cursor_name_must_match_whole_param() {
        let p = Paging {
            next: Some("https://graph.facebook.com/1/likes?xafter=nope".into()),
            ..Paging::default()
        };
        assert_eq!(p.cursor("after"), None);
    }

    #[test]
    fn page_from_payload() {
        let page = Page::from_payload(json!({
            "data": [{"id": "1"}, {"id": "2"}],
            "paging": {"cursors": {"before": "MQ", "after": "Mg"}, "next": "https://x/?after=Mg"}
        }))
        .unwrap();
        assert_eq!(page.records.len(), 2);
        let paging = page.paging.unwrap();
        assert!(paging.has_next());
        assert_eq!(paging.cursor("after").as_deref(), Some("Mg"));
    }

    #[test]
    fn page_without_paging_is_last() {
        let page = Page::from_payload(json!({"data": []})).unwrap();
        assert!(page.records.is_empty());
        assert!(page.paging.is_none());
    }

    #[test]
    fn page_without_data_is_malformed() {
        let err = Page::from_payload(json!({"id": "1"})).unwrap_err();
        assert!(matches!(err, Error::MalformedPage(_)), "got {err:?}");
        let err = Page::from_payload(json!({"data": {"id": "1"}})).unwrap_err();
        assert!(matches!(err, Error::MalformedPage(_)), "got {err:?}");
    }

    #[test]
    fn paging_with_bad_next_is_rejected() {
        let err = Paging::from_value(&json!({"next": 5})).unwrap_err();
        assert!(matches!(err, Error::Pagination(_)), "got {err:?}");
    }
}
