//! Stateless HTTP request builder and response parser for one resource kind.
//!
//! # Design
//! `ResourceClient` holds only a base URL and a `ResourceKind`. Each
//! operation is split into a `build_*` method that produces an `HttpRequest`
//! and a `parse_*` method that consumes an `HttpResponse`; `DataService`
//! runs the pair over a transport. Authorization headers come from a
//! `HeaderProvider` passed into every `build_*` call.
//!
//! Reads default to `full=true` so dependent multi-fragments and the
//! `TimeStamp` are included. The server itself defaults to `full=false`.

use serde_json::Value;

use crate::error::{GdsError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::session::HeaderProvider;
use crate::types::{ListQuery, Record, ID_FIELD, TIMESTAMP_FIELD};
use crate::ResourceKind;

/// SDK default for the `full` read flag.
pub const DEFAULT_FULL: bool = true;

/// Lower-cased body fragments the service uses to report a stale `TimeStamp`.
/// `concurrency` covers the `ConcurrencyException` name.
const CONCURRENCY_SIGNALS: &[&str] = &["concurrency", "optimistic", "timestamp mismatch"];

#[derive(Debug, Clone)]
pub struct ResourceClient {
    base_url: String,
    kind: ResourceKind,
}

impl ResourceClient {
    pub fn new(base_url: &str, kind: ResourceKind) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            kind,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, resource_type: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.kind.service_path(),
            urlencoding::encode(resource_type)
        )
    }

    fn item_url(&self, resource_type: &str, id: &str) -> String {
        format!("{}/{}", self.collection_url(resource_type), urlencoding::encode(id))
    }

    fn relation_url(&self, resource_type: &str, id: &str, relation: &str, related_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.item_url(resource_type, id),
            urlencoding::encode(relation),
            urlencoding::encode(related_id)
        )
    }

    fn request<A: HeaderProvider + ?Sized>(
        &self,
        auth: &A,
        method: HttpMethod,
        url: String,
        body: Option<String>,
    ) -> HttpRequest {
        HttpRequest {
            method,
            url,
            headers: auth.headers().to_vec(),
            body,
        }
    }

    pub fn build_get<A: HeaderProvider + ?Sized>(
        &self,
        auth: &A,
        resource_type: &str,
        id: &str,
        full: bool,
    ) -> HttpRequest {
        let url = format!("{}?full={full}", self.item_url(resource_type, id));
        self.request(auth, HttpMethod::Get, url, None)
    }

    /// PUT the partial record. `ID` and `TimeStamp` are required; every other
    /// attribute present is written, absent ones are untouched.
    pub fn build_update<A: HeaderProvider + ?Sized>(
        &self,
        auth: &A,
        resource_type: &str,
        record: &Record,
    ) -> Result<HttpRequest> {
        if record.id().is_none() {
            return Err(GdsError::local_validation(format!("update body has no {ID_FIELD}")));
        }
        if record.timestamp().is_none() {
            return Err(GdsError::local_validation(format!(
                "update body has no {TIMESTAMP_FIELD}; read the record first"
            )));
        }
        let body = serde_json::to_string(record).map_err(|e| GdsError::Serialization(e.to_string()))?;
        let url = format!("{}?full={DEFAULT_FULL}", self.collection_url(resource_type));
        Ok(self.request(auth, HttpMethod::Put, url, Some(body)))
    }

    pub fn build_create<A: HeaderProvider + ?Sized>(
        &self,
        auth: &A,
        resource_type: &str,
        record: &Record,
    ) -> Result<HttpRequest> {
        let body = serde_json::to_string(record).map_err(|e| GdsError::Serialization(e.to_string()))?;
        let url = self.collection_url(resource_type);
        Ok(self.request(auth, HttpMethod::Post, url, Some(body)))
    }

    pub fn build_delete<A: HeaderProvider + ?Sized>(&self, auth: &A, resource_type: &str, id: &str) -> HttpRequest {
        let url = self.item_url(resource_type, id);
        self.request(auth, HttpMethod::Delete, url, None)
    }

    pub fn build_list<A: HeaderProvider + ?Sized>(
        &self,
        auth: &A,
        resource_type: &str,
        query: &ListQuery,
    ) -> HttpRequest {
        let mut url = self.collection_url(resource_type);
        let qs = query.to_query_string();
        if !qs.is_empty() {
            url.push('?');
            url.push_str(&qs);
        }
        self.request(auth, HttpMethod::Get, url, None)
    }

    pub fn build_add_relation<A: HeaderProvider + ?Sized>(
        &self,
        auth: &A,
        resource_type: &str,
        id: &str,
        relation: &str,
        related_id: &str,
    ) -> HttpRequest {
        let url = self.relation_url(resource_type, id, relation, related_id);
        self.request(auth, HttpMethod::Post, url, None)
    }

    pub fn build_remove_relation<A: HeaderProvider + ?Sized>(
        &self,
        auth: &A,
        resource_type: &str,
        id: &str,
        relation: &str,
        related_id: &str,
    ) -> HttpRequest {
        let url = self.relation_url(resource_type, id, relation, related_id);
        self.request(auth, HttpMethod::Delete, url, None)
    }

    /// The service answers a missing or forbidden record with a client error
    /// or a `null` body; both are `NotFound`.
    pub fn parse_get(&self, response: HttpResponse) -> Result<Record> {
        if !response.is_success() {
            return Err(read_failure(response));
        }
        match parse_json(&response.body)? {
            Value::Null => Err(GdsError::NotFound),
            Value::Object(map) => Ok(Record::from(map)),
            other => Err(GdsError::Deserialization(format!("expected a JSON object, got {other}"))),
        }
    }

    pub fn parse_update(&self, response: HttpResponse) -> Result<()> {
        if !response.is_success() {
            return Err(update_failure(response));
        }
        Ok(())
    }

    /// The id assigned by the server, or the one the caller put in `sent`.
    pub fn parse_create(&self, response: HttpResponse, sent: &Record) -> Result<String> {
        if !response.is_success() {
            return Err(write_failure(response));
        }
        let from_body = match serde_json::from_str::<Value>(&response.body) {
            Ok(Value::String(id)) if !id.is_empty() => Some(id),
            Ok(Value::Object(map)) => map.get(ID_FIELD).and_then(Value::as_str).map(str::to_string),
            _ => None,
        };
        from_body
            .or_else(|| sent.id().map(str::to_string))
            .ok_or_else(|| GdsError::Deserialization("create response carries no identifier".to_string()))
    }

    pub fn parse_delete(&self, response: HttpResponse) -> Result<()> {
        if !response.is_success() {
            return Err(read_failure(response));
        }
        Ok(())
    }

    pub fn parse_list(&self, response: HttpResponse) -> Result<Vec<Record>> {
        if !response.is_success() {
            return Err(match response.status {
                401 | 403 => GdsError::Authorization {
                    status: response.status,
                    body: response.body,
                },
                404 => GdsError::NotFound,
                400..=499 => GdsError::Validation {
                    status: response.status,
                    body: response.body,
                },
                status => GdsError::Server {
                    status,
                    body: response.body,
                },
            });
        }
        match parse_json(&response.body)? {
            Value::Null => Ok(Vec::new()),
            value => serde_json::from_value(value).map_err(|e| GdsError::Deserialization(e.to_string())),
        }
    }

    pub fn parse_relation(&self, response: HttpResponse) -> Result<()> {
        if !response.is_success() {
            return Err(write_failure(response));
        }
        Ok(())
    }
}

fn parse_json(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| GdsError::Deserialization(e.to_string()))
}

/// Whether a rejected write reports a stale `TimeStamp`.
pub fn is_concurrency_signal(body: &str) -> bool {
    let body = body.to_lowercase();
    CONCURRENCY_SIGNALS.iter().any(|s| body.contains(s))
}

/// Map a failed read or delete to an error. A 401 means the bearer was
/// refused; any other client error means the record is absent or hidden.
fn read_failure(response: HttpResponse) -> GdsError {
    match response.status {
        401 => GdsError::Authorization {
            status: 401,
            body: response.body,
        },
        400..=499 => GdsError::NotFound,
        status => GdsError::Server {
            status,
            body: response.body,
        },
    }
}

/// Map a rejected update. Only an update carries a `TimeStamp`, so only
/// here can a rejection be a concurrency conflict.
fn update_failure(response: HttpResponse) -> GdsError {
    let conflict = response.status == 409
        || (matches!(response.status, 400..=500) && is_concurrency_signal(&response.body));
    if conflict {
        return GdsError::ConcurrencyConflict {
            status: response.status,
            body: response.body,
        };
    }
    write_failure(response)
}

/// Map a rejected create or relation change. A 409 here is a duplicate,
/// which is a validation failure.
fn write_failure(response: HttpResponse) -> GdsError {
    let HttpResponse { status, body, .. } = response;
    match status {
        401 | 403 => GdsError::Authorization { status, body },
        404 => GdsError::NotFound,
        415 => GdsError::UnsupportedMediaType(body),
        400..=499 | 500 => GdsError::Validation { status, body },
        _ => GdsError::Server { status, body },
    }
}
