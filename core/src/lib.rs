//! Synchronous client for the Matrix42 generic data service.
//!
//! # Overview
//! CRUD, relation and list operations against Configuration Item objects
//! and Data Definition fragments. Every `DataService` exchanges the
//! long-lived API token for a short-lived access token when it is built and
//! sends that token with each request. Updates round-trip the server's
//! `TimeStamp` so concurrent writers are detected.
//!
//! # Design
//! - `ResourceClient` and `Session` build `HttpRequest` values and parse
//!   `HttpResponse` values without touching the network (host-does-IO).
//! - `DataService` runs those pairs over a `Transport`; `UreqTransport` is
//!   the blocking default.
//! - Credentials are resolved by an explicit function; only
//!   `EnvOverrides::from_process_env` reads the environment.
//! - Every operation returns `Result<T, GdsError>`.
//!
//! ```no_run
//! use gds_core::{resolve_from_env, DataService, Record};
//!
//! # fn main() -> gds_core::Result<()> {
//! let creds = resolve_from_env(Some("https://esm.example.com/"), None, true)?;
//! let fragments = DataService::fragments(creds)?;
//! let current = fragments.get("SPSActivityClassBase", "8c51cfff-bf16-452e-8d2c-527cc25518c3")?;
//! let change = Record::update_of(&current).with("Version", "2.0.5");
//! fragments.update("SPSActivityClassBase", &change)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod service;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{ResourceClient, DEFAULT_FULL};
pub use config::{resolve_credentials, resolve_from_env, Credentials, EnvOverrides};
pub use error::{GdsError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use service::DataService;
pub use session::{HeaderProvider, Session, SessionState};
pub use transport::UreqTransport;
pub use types::{ListQuery, Record, ResourceKind, TimeStamp};
