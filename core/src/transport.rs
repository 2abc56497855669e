//! Transport seam between `ApiClient` and the network.
//!
//! A transport executes exactly one `HttpRequest` and returns whatever
//! response came back, whatever its status. It never retries and never
//! looks at the session. Once a status line has arrived the call succeeds,
//! even if the body is cut short.

use async_trait::async_trait;
use thiserror::Error;

use crate::http::{FormPart, HttpBody, HttpMethod, HttpRequest, HttpResponse};

/// No response was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn multipart_form(parts: Vec<FormPart>) -> Result<reqwest::multipart::Form, TransportError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        let mut file = reqwest::multipart::Part::bytes(part.data);
        if let Some(file_name) = part.file_name {
            file = file.file_name(file_name);
        }
        if let Some(mime) = part.mime {
            file = file.mime_str(&mime).map_err(convert_err)?;
        }
        form = form.part(part.name, file);
    }
    Ok(form)
}

fn convert_err(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        match request.body {
            Some(HttpBody::Json(text)) => builder = builder.body(text),
            // reqwest writes the multipart content-type with its boundary.
            Some(HttpBody::Multipart(parts)) => {
                builder = builder.multipart(multipart_form(parts)?);
            }
            None => {}
        }

        let response = builder.send().await.map_err(convert_err)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        // With a status in hand the call has succeeded; a short body counts as empty.
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(status, error = %e, "response body unreadable, treating as empty");
                String::new()
            }
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
