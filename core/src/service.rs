//! Authenticated, blocking data service for one resource kind.
//!
//! # Design
//! `DataService` composes a `Session`, a `ResourceClient` and a `Transport`.
//! Construction authenticates immediately, so a bad URL, a missing token or
//! a refused exchange fails here and never on first use. Each instance owns
//! its session; two services against the same server exchange tokens
//! independently. The access token is never refreshed.
//!
//! Every operation issues exactly one request and blocks until it completes.
//! Failures are per call and leave the service usable.

use tracing::debug;

use crate::client::{ResourceClient, DEFAULT_FULL};
use crate::config::Credentials;
use crate::error::Result;
use crate::http::Transport;
use crate::session::Session;
use crate::transport::UreqTransport;
use crate::types::{ListQuery, Record, ResourceKind};

#[derive(Debug)]
pub struct DataService<T = UreqTransport> {
    client: ResourceClient,
    session: Session,
    transport: T,
}

impl DataService<UreqTransport> {
    /// Configuration Item objects over the default blocking transport.
    pub fn objects(credentials: Credentials) -> Result<Self> {
        let transport = UreqTransport::new(credentials.verify_tls());
        Self::connect(credentials, ResourceKind::Objects, transport)
    }

    /// Data Definition fragments over the default blocking transport.
    pub fn fragments(credentials: Credentials) -> Result<Self> {
        let transport = UreqTransport::new(credentials.verify_tls());
        Self::connect(credentials, ResourceKind::Fragments, transport)
    }
}

impl<T: Transport> DataService<T> {
    pub fn connect(credentials: Credentials, kind: ResourceKind, transport: T) -> Result<Self> {
        let mut session = Session::new(credentials);
        session.authenticate(&transport)?;
        let client = ResourceClient::new(session.credentials().base_url(), kind);
        Ok(Self {
            client,
            session,
            transport,
        })
    }

    pub fn kind(&self) -> ResourceKind {
        self.client.kind()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Read a record including dependent multi-fragments (`full=true`).
    pub fn get(&self, resource_type: &str, id: &str) -> Result<Record> {
        self.get_with(resource_type, id, DEFAULT_FULL)
    }

    pub fn get_with(&self, resource_type: &str, id: &str, full: bool) -> Result<Record> {
        debug!(resource_type, id, full, "get");
        let req = self.client.build_get(&self.session, resource_type, id, full);
        self.client.parse_get(self.transport.execute(req)?)
    }

    /// Write the attributes present in `record`. `record` must carry the
    /// `ID` and `TimeStamp` from a prior `get`; on `ConcurrencyConflict`
    /// re-read before retrying.
    pub fn update(&self, resource_type: &str, record: &Record) -> Result<()> {
        debug!(resource_type, id = record.id(), "update");
        let req = self.client.build_update(&self.session, resource_type, record)?;
        self.client.parse_update(self.transport.execute(req)?)
    }

    /// Create a record and return its identifier.
    pub fn create(&self, resource_type: &str, record: &Record) -> Result<String> {
        debug!(resource_type, "create");
        let req = self.client.build_create(&self.session, resource_type, record)?;
        self.client.parse_create(self.transport.execute(req)?, record)
    }

    pub fn delete(&self, resource_type: &str, id: &str) -> Result<()> {
        debug!(resource_type, id, "delete");
        let req = self.client.build_delete(&self.session, resource_type, id);
        self.client.parse_delete(self.transport.execute(req)?)
    }

    pub fn list(&self, resource_type: &str, query: &ListQuery) -> Result<Vec<Record>> {
        debug!(resource_type, ?query, "list");
        let req = self.client.build_list(&self.session, resource_type, query);
        self.client.parse_list(self.transport.execute(req)?)
    }

    pub fn add_relation(&self, resource_type: &str, id: &str, relation: &str, related_id: &str) -> Result<()> {
        debug!(resource_type, id, relation, related_id, "add relation");
        let req = self
            .client
            .build_add_relation(&self.session, resource_type, id, relation, related_id);
        self.client.parse_relation(self.transport.execute(req)?)
    }

    pub fn remove_relation(&self, resource_type: &str, id: &str, relation: &str, related_id: &str) -> Result<()> {
        debug!(resource_type, id, relation, related_id, "remove relation");
        let req = self
            .client
            .build_remove_relation(&self.session, resource_type, id, relation, related_id);
        self.client.parse_relation(self.transport.execute(req)?)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::config::{resolve_credentials, EnvOverrides};
    use crate::error::GdsError;
    use crate::http::{HttpMethod, HttpRequest, HttpResponse};
    use crate::session::{bearer_token, HeaderProvider, SessionState};

    /// Replays queued responses and records every request.
    #[derive(Debug, Default)]
    struct Replay {
        responses: RefCell<VecDeque<Result<HttpResponse>>>,
        seen: RefCell<Vec<HttpRequest>>,
    }

    impl Replay {
        fn push(self, status: u16, body: &str) -> Self {
            self.responses.borrow_mut().push_back(Ok(HttpResponse {
                status,
                headers: Vec::new(),
                body: body.to_string(),
            }));
            self
        }

        fn fail(self, msg: &str) -> Self {
            self.responses
                .borrow_mut()
                .push_back(Err(GdsError::Transport(msg.to_string())));
            self
        }

        fn authenticated() -> Self {
            Replay::default().push(200, r#"{"RawToken":"access"}"#)
        }
    }

    impl Transport for Replay {
        fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.borrow_mut().push(request);
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(GdsError::Transport("no scripted response".to_string())))
        }
    }

    fn credentials() -> Credentials {
        resolve_credentials(Some("https://h.example.com/"), Some("abc"), &EnvOverrides::default(), true).unwrap()
    }

    #[test]
    fn construction_authenticates_once() {
        let service = DataService::connect(credentials(), ResourceKind::Objects, Replay::authenticated()).unwrap();
        assert_eq!(service.session().state(), SessionState::Authenticated);
        assert_eq!(bearer_token(service.session().headers()), Some("access"));
        assert_eq!(service.transport.seen.borrow().len(), 1);
    }

    #[test]
    fn construction_fails_fast_on_exchange_error() {
        let err = DataService::connect(credentials(), ResourceKind::Objects, Replay::default().push(500, "")).unwrap_err();
        assert!(matches!(err, GdsError::Authentication(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn requests_carry_the_access_token() {
        let transport = Replay::authenticated().push(200, r#"{"ID":"x","TimeStamp":"t1"}"#);
        let service = DataService::connect(credentials(), ResourceKind::Objects, transport).unwrap();
        let record = service.get("Incident", "x").unwrap();
        assert_eq!(record.timestamp().unwrap().to_string(), "t1");

        let seen = service.transport.seen.borrow();
        let get = &seen[1];
        assert_eq!(get.method, HttpMethod::Get);
        assert_eq!(get.url, "https://h.example.com/M42Services/api/data/objects/Incident/x?full=true");
        assert_eq!(get.header("Authorization"), Some("Bearer access"));
        assert_eq!(get.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn get_bad_id_is_not_found() {
        let transport = Replay::authenticated().push(400, "");
        let service = DataService::connect(credentials(), ResourceKind::Objects, transport).unwrap();
        assert!(matches!(service.get("Incident", "bad-id"), Err(GdsError::NotFound)));
    }

    #[test]
    fn stale_marker_is_conflict_and_service_stays_usable() {
        let transport = Replay::authenticated()
            .push(500, r#"{"Message":"Concurrency violation: the record has been changed"}"#)
            .push(200, r#"{"ID":"x","TimeStamp":"t2"}"#);
        let service = DataService::connect(credentials(), ResourceKind::Objects, transport).unwrap();

        let stale = Record::new().with("ID", "x").with("TimeStamp", "t1").with("Name", "n");
        let err = service.update("Incident", &stale).unwrap_err();
        assert!(matches!(err, GdsError::ConcurrencyConflict { .. }));
        assert!(!err.is_fatal());

        let fresh = service.get("Incident", "x").unwrap();
        assert_eq!(fresh.timestamp().unwrap().to_string(), "t2");
    }

    #[test]
    fn update_without_marker_sends_nothing() {
        let service = DataService::connect(credentials(), ResourceKind::Fragments, Replay::authenticated()).unwrap();
        let err = service.update("SPSActivityClassBase", &Record::new().with("ID", "x")).unwrap_err();
        assert!(matches!(err, GdsError::Validation { .. }));
        assert_eq!(service.transport.seen.borrow().len(), 1);
    }

    #[test]
    fn transport_failure_is_reported_per_call() {
        let transport = Replay::authenticated().fail("connection reset").push(204, "");
        let service = DataService::connect(credentials(), ResourceKind::Objects, transport).unwrap();
        assert!(matches!(service.delete("Incident", "x"), Err(GdsError::Transport(_))));
        assert!(service.delete("Incident", "x").is_ok());
    }

    #[test]
    fn list_and_relations_issue_one_request_each() {
        let transport = Replay::authenticated()
            .push(200, r#"[{"ID":"a"}]"#)
            .push(200, "")
            .push(200, "");
        let service = DataService::connect(credentials(), ResourceKind::Fragments, transport).unwrap();
        let records = service.list("SPSActivityClassBase", &ListQuery::new()).unwrap();
        assert_eq!(records.len(), 1);
        service.add_relation("SPSActivityClassBase", "a", "Owners", "b").unwrap();
        service.remove_relation("SPSActivityClassBase", "a", "Owners", "b").unwrap();

        let seen = service.transport.seen.borrow();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[2].method, HttpMethod::Post);
        assert_eq!(seen[3].method, HttpMethod::Delete);
    }
}
