//! In-process transports for driving `ApiClient` without a network.
//!
//! `Scripted` answers synchronously from a closure and records every request.
//! `Manual` hands each request to the test as a `Pending`, so the test
//! decides when, in what order, and whether to answer at all.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use smartwaste_core::{
    ApiClient, ClientConfig, HttpRequest, HttpResponse, MemoryStore, SessionStore, Transport,
    TransportError,
};
use tokio::sync::{mpsc, oneshot};

pub const BASE_URL: &str = "http://mock.local/api";

pub fn config() -> ClientConfig {
    ClientConfig::new(BASE_URL)
        .unwrap()
        .with_timeout(Duration::from_secs(5))
        .unwrap()
}

pub fn client_with(transport: impl Transport + 'static) -> ApiClient {
    ApiClient::new(config(), transport, MemoryStore::new())
}

pub fn client_with_store(
    transport: impl Transport + 'static,
    store: impl SessionStore + 'static,
) -> ApiClient {
    ApiClient::new(config(), transport, store)
}

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

#[derive(Clone)]
pub struct Scripted {
    responder: Arc<Responder>,
    seen: Arc<Mutex<Vec<HttpRequest>>>,
}

impl Scripted {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always answer with `status` and `body`.
    pub fn always(status: u16, body: &str) -> Self {
        let body = body.to_string();
        Self::new(move |_| Ok(HttpResponse::new(status, body.clone())))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last(&self) -> HttpRequest {
        self.requests().pop().expect("no request was sent")
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let result = (self.responder)(&request);
        self.seen.lock().unwrap().push(request);
        result
    }
}

/// A request waiting for the test to answer it.
pub struct Pending {
    pub request: HttpRequest,
    reply: oneshot::Sender<Result<HttpResponse, TransportError>>,
}

impl Pending {
    pub fn respond(self, status: u16, body: &str) {
        let _ = self.reply.send(Ok(HttpResponse::new(status, body)));
    }

    pub fn fail(self, error: TransportError) {
        let _ = self.reply.send(Err(error));
    }
}

pub struct Manual {
    tx: mpsc::UnboundedSender<Pending>,
}

impl Manual {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Pending>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for Manual {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(Pending { request, reply })
            .map_err(|_| TransportError::Other("test harness closed".to_string()))?;
        answer
            .await
            .map_err(|_| TransportError::Other("request dropped by test".to_string()))?
    }
}

pub const LOGIN_OK: &str = concat!(
    r#"{"success":true,"token":"T1","user":"#,
    r#"{"userId":"u1","name":"A","email":"a@b.com","userType":"citizen","permissions":[]}}"#,
);

/// Answers login with `LOGIN_OK` and everything else with an empty
/// active-routes list.
pub fn login_then_ok() -> Scripted {
    Scripted::new(|req| {
        if req.url.ends_with("/auth/login") {
            Ok(HttpResponse::new(200, LOGIN_OK))
        } else {
            Ok(HttpResponse::new(200, r#"{"activeRoutes":[]}"#))
        }
    })
}
