//! Async client core for the SmartWaste waste-collection API.
//!
//! # Overview
//! `ApiClient` turns domain calls (log in, fetch nearby bins, report route
//! progress) into HTTP requests, owns the bearer-token session, and
//! normalizes every failure into the closed `ApiError` set. Presentation
//! layers call it and react to the result; they never see raw HTTP.
//!
//! # Design
//! - One request primitive, `ApiClient::request`; every domain method is a
//!   thin wrapper over an entry in the `endpoints` table.
//! - The network sits behind the `Transport` trait, so tests can script
//!   responses, delays and out-of-order completion.
//! - The session is the only shared mutable state. It is read once per
//!   request and replaced wholesale on login, logout and 401.
//! - DTOs are defined independently from the mock-server crate; the
//!   end-to-end tests catch schema drift.

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;
pub mod types;

pub use client::ApiClient;
pub use config::{ClientConfig, ConfigError, Deployment};
pub use endpoint::{endpoints, ApiRequest, Endpoint, QueryValue};
pub use error::{ApiError, ApiErrorKind};
pub use http::{FormPart, HttpBody, HttpMethod, HttpRequest, HttpResponse};
pub use session::{FileStore, MemoryStore, Session, SessionStore, SessionUser, StoreError};
pub use transport::{ReqwestTransport, Transport, TransportError};
pub use types::*;
