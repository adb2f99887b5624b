//! Small-resource classification
//!
//! Graph collections (likes, `from` of shared posts) reference other objects
//! as compact dictionaries. The key set tells what kind of object it is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Kind of object a compact resource refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Page,
    Application,
    User,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Page => "page",
            ResourceKind::Application => "application",
            ResourceKind::User => "user",
        }
    }
}

/// A classified compact resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmallResource {
    pub kind: ResourceKind,
    pub graph_id: String,
    /// Remaining fields, used as defaults when the record is first created
    pub fields: Map<String, Value>,
}

impl SmallResource {
    /// Classify `value` by its exact key set.
    ///
    /// - `{category, id, name}` or `{category, category_list, id, name}` → Page
    /// - `{id, name, namespace}` → Application
    /// - `{id, name}` or `{id}` → User
    pub fn classify(value: &Value) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            return Err(Error::UnknownResourceType(value.clone()));
        };
        let Some(graph_id) = obj.get("id").and_then(graph_id) else {
            return Err(Error::UnknownResourceType(value.clone()));
        };

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        let kind = match keys.as_slice() {
            ["category", "id", "name"] | ["category", "category_list", "id", "name"] => ResourceKind::Page,
            ["id", "name", "namespace"] => ResourceKind::Application,
            ["id", "name"] | ["id"] => ResourceKind::User,
            _ => return Err(Error::UnknownResourceType(value.clone())),
        };

        let mut fields = obj.clone();
        fields.remove("id");
        fields.remove("category_list");
        Ok(Self { kind, graph_id, fields })
    }
}

/// Graph ids arrive as strings, and as numbers from some older endpoints.
pub fn graph_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
