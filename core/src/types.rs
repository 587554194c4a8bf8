//! Domain DTOs for the generic data service.
//!
//! # Design
//! Records are schema-less: the service accepts any Configuration Item or
//! Data Definition, so a `Record` is a JSON object with typed access to the
//! two attributes every record carries, `ID` and `TimeStamp`. The server
//! modifies only attributes present in an update body, so a `Record` never
//! fills in absent fields; an explicit `null` is how a caller clears one.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ID_FIELD: &str = "ID";
pub const TIMESTAMP_FIELD: &str = "TimeStamp";

/// The two resource kinds exposed by the generic data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Configuration Item objects, addressed by CI name.
    Objects,
    /// Data Definition fragments, addressed by DD name.
    Fragments,
}

impl ResourceKind {
    pub fn service_path(self) -> &'static str {
        match self {
            ResourceKind::Objects => "M42Services/api/data/objects",
            ResourceKind::Fragments => "M42Services/api/data/fragments",
        }
    }
}

/// Server-issued concurrency marker. Opaque: round-trip it, never build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(Value);

impl TimeStamp {
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// One object or fragment as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// A skeleton update body for `fetched`: its `ID` and `TimeStamp` and
    /// nothing else. Add only the attributes to change.
    pub fn update_of(fetched: &Record) -> Self {
        let mut record = Record::new();
        for field in [ID_FIELD, TIMESTAMP_FIELD] {
            if let Some(v) = fetched.get(field) {
                record.0.insert(field.to_string(), v.clone());
            }
        }
        record
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn timestamp(&self) -> Option<TimeStamp> {
        match self.0.get(TIMESTAMP_FIELD) {
            None | Some(Value::Null) => None,
            Some(v) => Some(TimeStamp(v.clone())),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Builder form of `set`.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Mark `field` for clearing on the server.
    pub fn clear(&mut self, field: impl Into<String>) -> &mut Self {
        self.0.insert(field.into(), Value::Null);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Optional list parameters. Absent fields are left out of the query string
/// so the server applies its own defaults; page values are not validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// A-SQL where expression.
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// A-SQL column list, e.g. `Name, Parent.Name as ParentName`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
    /// e.g. `Name ASC, CreatedDate DESC`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_localizations: Option<bool>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, expr: impl Into<String>) -> Self {
        self.filter = Some(expr.into());
        self
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    pub fn page(mut self, page_size: i64, page_number: i64) -> Self {
        self.page_size = Some(page_size);
        self.page_number = Some(page_number);
        self
    }

    pub fn sort(mut self, expr: impl Into<String>) -> Self {
        self.sort = Some(expr.into());
        self
    }

    pub fn include_localizations(mut self, include: bool) -> Self {
        self.include_localizations = Some(include);
        self
    }

    /// Query parameters in a fixed order, values not yet encoded.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = &self.filter {
            pairs.push(("where", v.clone()));
        }
        if let Some(v) = &self.columns {
            pairs.push(("columns", v.clone()));
        }
        if let Some(v) = self.page_size {
            pairs.push(("pageSize", v.to_string()));
        }
        if let Some(v) = self.page_number {
            pairs.push(("pageNumber", v.to_string()));
        }
        if let Some(v) = &self.sort {
            pairs.push(("sort", v.clone()));
        }
        if let Some(v) = self.include_localizations {
            pairs.push(("includeLocalizations", v.to_string()));
        }
        pairs
    }

    /// Encoded query string without the leading `?`; empty when nothing is set.
    pub fn to_query_string(&self) -> String {
        self.to_pairs()
            .into_iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
