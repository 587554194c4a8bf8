use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const TOKEN_EXCHANGE_PATH: &str = "/m42Services/api/ApiToken/GenerateAccessTokenFromApiToken/";

const CONCURRENCY_MESSAGE: &str = "The record has been changed by another user since it was read.";

#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Long-lived token accepted by the exchange endpoint.
    pub api_token: String,
    /// Access token handed out by the exchange and required on data calls.
    pub access_token: String,
    /// Attributes that may not be missing on create or cleared on update.
    pub mandatory: Vec<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            api_token: "test-api-token".to_string(),
            access_token: "mock-access-token".to_string(),
            mandatory: Vec::new(),
        }
    }
}

pub type Record = Map<String, Value>;

type TableKey = (String, String);
type EdgeKey = (String, String, String, String);

#[derive(Default)]
struct Store {
    tables: HashMap<TableKey, BTreeMap<String, Record>>,
    relations: HashMap<EdgeKey, BTreeSet<String>>,
    version: u64,
}

impl Store {
    fn next_timestamp(&mut self) -> Value {
        self.version += 1;
        Value::String(format!("{:016X}", self.version))
    }
}

pub struct MockState {
    config: MockConfig,
    store: RwLock<Store>,
}

pub type Shared = Arc<MockState>;

pub fn app() -> Router {
    app_with(MockConfig::default())
}

pub fn app_with(config: MockConfig) -> Router {
    let state: Shared = Arc::new(MockState {
        config,
        store: RwLock::new(Store::default()),
    });
    Router::new()
        .route(TOKEN_EXCHANGE_PATH, post(exchange_token))
        .route(
            "/M42Services/api/data/{kind}/{ty}",
            get(list_records).post(create_record).put(update_record),
        )
        .route(
            "/M42Services/api/data/{kind}/{ty}/{id}",
            get(get_record).delete(delete_record),
        )
        .route(
            "/M42Services/api/data/{kind}/{ty}/{id}/{relation}/{related}",
            post(add_relation).delete(remove_relation),
        )
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, MockConfig::default()).await
}

pub async fn run_with(listener: TcpListener, config: MockConfig) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

fn service_error(status: StatusCode, exception: &str, message: impl Into<String>) -> Response {
    let message: String = message.into();
    let body = json!({ "ExceptionName": exception, "Message": message });
    (status, Json(body)).into_response()
}

fn validation_error(message: impl Into<String>) -> Response {
    service_error(StatusCode::INTERNAL_SERVER_ERROR, "ValidationException", message)
}

fn bad_request(message: impl Into<String>) -> Response {
    service_error(StatusCode::BAD_REQUEST, "ArgumentException", message)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn authorize(state: &MockState, headers: &HeaderMap) -> Result<(), Response> {
    match bearer(headers) {
        Some(token) if token == state.config.access_token => Ok(()),
        _ => Err(service_error(StatusCode::UNAUTHORIZED, "UnauthorizedAccessException", "invalid access token")),
    }
}

fn table_kind(kind: &str) -> Result<(), Response> {
    match kind {
        "objects" | "fragments" => Ok(()),
        _ => Err(StatusCode::NOT_FOUND.into_response()),
    }
}

fn parse_guid(id: &str) -> Result<(), Response> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| bad_request(format!("'{id}' is not a valid GUID")))
}

async fn exchange_token(State(state): State<Shared>, headers: HeaderMap) -> Response {
    match bearer(&headers) {
        Some(token) if token == state.config.api_token => {
            info!("issued access token");
            Json(json!({
                "RawToken": state.config.access_token,
                "ValidTo": "2099-01-01T00:00:00Z",
            }))
            .into_response()
        }
        _ => service_error(StatusCode::UNAUTHORIZED, "UnauthorizedAccessException", "invalid API token"),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadParams {
    #[serde(default)]
    pub full: bool,
}

/// The stored record as the service shows it. Without `full` the concurrency
/// marker and relation edges are left out.
fn render(store: &Store, kind: &str, ty: &str, record: &Record, full: bool) -> Record {
    let mut out = record.clone();
    if !full {
        out.remove("TimeStamp");
        return out;
    }
    let id = record.get("ID").and_then(Value::as_str).unwrap_or_default();
    for ((k, t, i, relation), targets) in &store.relations {
        if k == kind && t == ty && i == id && !targets.is_empty() {
            let ids = targets.iter().cloned().map(Value::String).collect();
            out.insert(relation.clone(), Value::Array(ids));
        }
    }
    out
}

async fn get_record(
    State(state): State<Shared>,
    Path((kind, ty, id)): Path<(String, String, String)>,
    Query(params): Query<ReadParams>,
    headers: HeaderMap,
) -> Result<Json<Record>, Response> {
    authorize(&state, &headers)?;
    table_kind(&kind)?;
    parse_guid(&id)?;
    let store = state.store.read().await;
    let record = store
        .tables
        .get(&(kind.clone(), ty.clone()))
        .and_then(|t| t.get(&id))
        .ok_or_else(|| StatusCode::NOT_FOUND.into_response())?;
    Ok(Json(render(&store, &kind, &ty, record, params.full)))
}

fn missing_mandatory<'a>(config: &'a MockConfig, body: &Record, on_create: bool) -> Option<&'a str> {
    config
        .mandatory
        .iter()
        .find(|field| match body.get(field.as_str()) {
            None => on_create,
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .map(String::as_str)
}

async fn create_record(
    State(state): State<Shared>,
    Path((kind, ty)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Response> {
    authorize(&state, &headers)?;
    table_kind(&kind)?;
    let Value::Object(mut record) = body else {
        return Err(bad_request("request body must be a JSON object"));
    };
    if let Some(field) = missing_mandatory(&state.config, &record, true) {
        return Err(validation_error(format!("Attribute '{field}' is mandatory.")));
    }

    let id = match record.get("ID") {
        None | Some(Value::Null) => Uuid::new_v4().to_string(),
        Some(Value::String(id)) => {
            parse_guid(id)?;
            id.clone()
        }
        Some(_) => return Err(bad_request("ID must be a GUID string")),
    };

    let mut store = state.store.write().await;
    let timestamp = store.next_timestamp();
    let table = store.tables.entry((kind, ty)).or_default();
    if table.contains_key(&id) {
        return Err(validation_error(format!("A record with ID '{id}' already exists.")));
    }
    record.insert("ID".to_string(), Value::String(id.clone()));
    record.insert("TimeStamp".to_string(), timestamp);
    table.insert(id.clone(), record);
    debug!(%id, "created record");
    Ok(Json(Value::String(id)))
}

async fn update_record(
    State(state): State<Shared>,
    Path((kind, ty)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<StatusCode, Response> {
    authorize(&state, &headers)?;
    table_kind(&kind)?;
    let Value::Object(changes) = body else {
        return Err(bad_request("request body must be a JSON object"));
    };
    let Some(id) = changes.get("ID").and_then(Value::as_str).map(str::to_string) else {
        return Err(validation_error("ID is missing in the request body."));
    };
    let Some(marker) = changes.get("TimeStamp").cloned() else {
        return Err(validation_error("TimeStamp is missing in the request body."));
    };
    if let Some(field) = missing_mandatory(&state.config, &changes, false) {
        return Err(validation_error(format!("Attribute '{field}' is mandatory.")));
    }

    let mut store = state.store.write().await;
    let timestamp = store.next_timestamp();
    let record = store
        .tables
        .get_mut(&(kind, ty))
        .and_then(|t| t.get_mut(&id))
        .ok_or_else(|| StatusCode::NOT_FOUND.into_response())?;
    if record.get("TimeStamp") != Some(&marker) {
        debug!(%id, "rejected stale TimeStamp");
        return Err(service_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ConcurrencyException",
            CONCURRENCY_MESSAGE,
        ));
    }
    for (field, value) in changes {
        if field != "ID" && field != "TimeStamp" {
            record.insert(field, value);
        }
    }
    record.insert("TimeStamp".to_string(), timestamp);
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_record(
    State(state): State<Shared>,
    Path((kind, ty, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, Response> {
    authorize(&state, &headers)?;
    table_kind(&kind)?;
    parse_guid(&id)?;
    let mut store = state.store.write().await;
    let removed = store
        .tables
        .get_mut(&(kind.clone(), ty.clone()))
        .and_then(|t| t.remove(&id));
    if removed.is_none() {
        return Err(StatusCode::NOT_FOUND.into_response());
    }
    store
        .relations
        .retain(|(k, t, i, _), _| !(k == &kind && t == &ty && i == &id));
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(rename = "where")]
    pub filter: Option<String>,
    pub columns: Option<String>,
    pub page_size: Option<i64>,
    pub page_number: Option<i64>,
    pub sort: Option<String>,
    pub include_localizations: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    Like(String, String),
}

/// Supports `Attr = 'value'` and `Attr LIKE 'pattern'` with `%` at either end.
pub fn parse_filter(expr: &str) -> Option<Filter> {
    let upper = expr.to_ascii_uppercase();
    let (attr, value, like) = if let Some(idx) = upper.find(" LIKE ") {
        (&expr[..idx], &expr[idx + 6..], true)
    } else {
        let idx = expr.find('=')?;
        (&expr[..idx], &expr[idx + 1..], false)
    };
    let attr = attr.trim();
    let value = value.trim().strip_prefix('\'')?.strip_suffix('\'')?;
    if attr.is_empty() {
        return None;
    }
    Some(if like {
        Filter::Like(attr.to_string(), value.to_string())
    } else {
        Filter::Eq(attr.to_string(), value.to_string())
    })
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq(attr, expected) => record.get(attr).map(text).as_deref() == Some(expected.as_str()),
            Filter::Like(attr, pattern) => {
                let Some(actual) = record.get(attr).map(text) else {
                    return false;
                };
                match (pattern.strip_prefix('%'), pattern.strip_suffix('%')) {
                    (Some(_), Some(_)) if pattern.len() >= 2 => actual.contains(&pattern[1..pattern.len() - 1]),
                    (Some(suffix), None) => actual.ends_with(suffix),
                    (None, Some(prefix)) => actual.starts_with(prefix),
                    _ => actual == *pattern,
                }
            }
        }
    }
}

/// `Name ASC, CreatedDate DESC` as (attribute, descending) pairs.
fn parse_sort(expr: &str) -> Vec<(String, bool)> {
    expr.split(',')
        .filter_map(|part| {
            let mut tokens = part.split_whitespace();
            let attr = tokens.next()?.to_string();
            let descending = tokens.next().is_some_and(|d| d.eq_ignore_ascii_case("DESC"));
            Some((attr, descending))
        })
        .collect()
}

/// `Name, Parent.Name as ParentName` as (source, output) pairs.
fn parse_columns(expr: &str) -> Vec<(String, String)> {
    expr.split(',')
        .filter_map(|part| {
            let tokens: Vec<&str> = part.split_whitespace().collect();
            match tokens.as_slice() {
                [source] => Some((source.to_string(), source.to_string())),
                [source, kw, alias] if kw.eq_ignore_ascii_case("as") => Some((source.to_string(), alias.to_string())),
                _ => None,
            }
        })
        .collect()
}

async fn list_records(
    State(state): State<Shared>,
    Path((kind, ty)): Path<(String, String)>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<Record>>, Response> {
    authorize(&state, &headers)?;
    table_kind(&kind)?;
    debug!(?params, "list");

    let filter = match params.filter.as_deref() {
        Some(expr) => Some(parse_filter(expr).ok_or_else(|| bad_request(format!("unsupported where expression: {expr}")))?),
        None => None,
    };
    if params.page_size.is_some_and(|n| n <= 0) || params.page_number.is_some_and(|n| n < 0) {
        return Err(bad_request("pageSize must be positive and pageNumber non-negative"));
    }

    let store = state.store.read().await;
    let mut rows: Vec<&Record> = store
        .tables
        .get(&(kind, ty))
        .map(|t| t.values().filter(|r| filter.as_ref().map_or(true, |f| f.matches(r))).collect())
        .unwrap_or_default();

    if let Some(sort) = params.sort.as_deref() {
        let keys = parse_sort(sort);
        rows.sort_by(|a, b| {
            keys.iter()
                .map(|(attr, desc)| {
                    let ord = a.get(attr).map(text).cmp(&b.get(attr).map(text));
                    if *desc {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    if let Some(size) = params.page_size {
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        let page = usize::try_from(params.page_number.unwrap_or(0)).unwrap_or(usize::MAX);
        rows = rows.into_iter().skip(size.saturating_mul(page)).take(size).collect();
    }

    let columns = params.columns.as_deref().map(parse_columns).unwrap_or_default();
    let result = rows
        .into_iter()
        .map(|r| {
            let mut out = Record::new();
            out.insert("ID".to_string(), r.get("ID").cloned().unwrap_or(Value::Null));
            for (source, alias) in &columns {
                out.insert(alias.clone(), r.get(source).cloned().unwrap_or(Value::Null));
            }
            out
        })
        .collect();
    Ok(Json(result))
}

async fn add_relation(
    State(state): State<Shared>,
    Path((kind, ty, id, relation, related)): Path<(String, String, String, String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, Response> {
    authorize(&state, &headers)?;
    table_kind(&kind)?;
    parse_guid(&related)?;
    let mut store = state.store.write().await;
    let exists = store
        .tables
        .get(&(kind.clone(), ty.clone()))
        .is_some_and(|t| t.contains_key(&id));
    if !exists {
        return Err(StatusCode::NOT_FOUND.into_response());
    }
    store
        .relations
        .entry((kind, ty, id, relation))
        .or_default()
        .insert(related);
    Ok(StatusCode::OK)
}

async fn remove_relation(
    State(state): State<Shared>,
    Path((kind, ty, id, relation, related)): Path<(String, String, String, String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, Response> {
    authorize(&state, &headers)?;
    table_kind(&kind)?;
    let mut store = state.store.write().await;
    let removed = store
        .relations
        .get_mut(&(kind, ty, id, relation))
        .is_some_and(|targets| targets.remove(&related));
    if removed {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::NOT_FOUND.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn timestamps_are_unique_and_opaque_strings() {
        let mut store = Store::default();
        let a = store.next_timestamp();
        let b = store.next_timestamp();
        assert_ne!(a, b);
        assert!(a.is_string());
    }

    #[test]
    fn parse_filter_equality() {
        assert_eq!(
            parse_filter("Name = 'JupyterLab'"),
            Some(Filter::Eq("Name".to_string(), "JupyterLab".to_string()))
        );
    }

    #[test]
    fn parse_filter_like() {
        assert_eq!(
            parse_filter("Name like 'Jup%'"),
            Some(Filter::Like("Name".to_string(), "Jup%".to_string()))
        );
    }

    #[test]
    fn parse_filter_rejects_unquoted() {
        assert_eq!(parse_filter("Name = Jupyter"), None);
        assert_eq!(parse_filter("Name"), None);
        assert_eq!(parse_filter(" = 'x'"), None);
    }

    #[test]
    fn like_patterns() {
        let r = record(json!({"Name": "JupyterLab"}));
        assert!(Filter::Like("Name".into(), "Jup%".into()).matches(&r));
        assert!(Filter::Like("Name".into(), "%Lab".into()).matches(&r));
        assert!(Filter::Like("Name".into(), "%pyte%".into()).matches(&r));
        assert!(!Filter::Like("Name".into(), "Lab%".into()).matches(&r));
        assert!(!Filter::Like("Missing".into(), "%".into()).matches(&r));
    }

    #[test]
    fn equality_compares_non_string_values_as_text() {
        let r = record(json!({"VersionState": 2}));
        assert!(Filter::Eq("VersionState".into(), "2".into()).matches(&r));
    }

    #[test]
    fn sort_and_columns_parsing() {
        assert_eq!(
            parse_sort("Name ASC, CreatedDate DESC"),
            vec![("Name".to_string(), false), ("CreatedDate".to_string(), true)]
        );
        assert_eq!(
            parse_columns("Name, Parent.Name as ParentName"),
            vec![
                ("Name".to_string(), "Name".to_string()),
                ("Parent.Name".to_string(), "ParentName".to_string())
            ]
        );
    }

    #[test]
    fn mandatory_attributes() {
        let config = MockConfig {
            mandatory: vec!["Name".to_string()],
            ..MockConfig::default()
        };
        assert_eq!(missing_mandatory(&config, &record(json!({})), true), Some("Name"));
        assert_eq!(missing_mandatory(&config, &record(json!({})), false), None);
        assert_eq!(missing_mandatory(&config, &record(json!({"Name": null})), false), Some("Name"));
        assert_eq!(missing_mandatory(&config, &record(json!({"Name": "x"})), true), None);
    }

    #[test]
    fn list_params_use_wire_names() {
        let params: ListParams =
            serde_json::from_value(json!({"where": "Name = 'x'", "pageSize": 5, "includeLocalizations": true})).unwrap();
        assert_eq!(params.filter.as_deref(), Some("Name = 'x'"));
        assert_eq!(params.page_size, Some(5));
        assert_eq!(params.include_localizations, Some(true));
        assert!(params.page_number.is_none());
    }
}
