//! HTTP value types shared by the orchestrator and the transport.
//!
//! # Design
//! Outbound calls are plain data: `TransportCall` is everything a transport
//! needs to start one task, and it is built from a `Request` without any
//! session or registry state. Inbound data flows the other way through
//! `ResponseMetadata` (what a transport learns from the status line and
//! headers) into an `HttpResponse` accumulator, which is frozen into an
//! immutable `Response` when the task completes.
//!
//! Owned types (`String`, `Bytes`, `PathBuf`) keep values free to move
//! between the caller, the bridge, and transport worker threads.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single header field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// What travels with a request: an in-memory body, a file to upload, or a
/// destination to download into. Paths are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Payload {
    Data(Option<Bytes>),
    Upload(PathBuf),
    Download(PathBuf),
}

impl Payload {
    /// Short name of the request shape, used in logs and errors.
    pub fn shape(&self) -> &'static str {
        match self {
            Payload::Data(_) => "data",
            Payload::Upload(_) => "upload",
            Payload::Download(_) => "download",
        }
    }
}

/// Everything a transport session needs to create one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCall {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<HttpHeader>,
    pub payload: Payload,
}

/// Status line and headers as first reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub url: Option<String>,
    pub status: u16,
    pub headers: Vec<HttpHeader>,
    pub mime_type: Option<String>,
    pub expected_content_length: Option<u64>,
}

/// Mutable response accumulator for one in-flight task.
///
/// Created from the first `ResponseMetadata` a task reports, then fed body
/// chunks until the task completes and `finalize` freezes it.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub url: Option<String>,
    pub status: u16,
    pub headers: Vec<HttpHeader>,
    pub mime_type: Option<String>,
    pub expected_content_length: Option<u64>,
    pub body: BytesMut,
    pub resource_location: Option<PathBuf>,
}

impl HttpResponse {
    pub fn from_metadata(metadata: ResponseMetadata) -> Self {
        let mut response = HttpResponse::default();
        response.update(metadata);
        response
    }

    /// Replace the metadata (redirects may report headers more than once),
    /// keeping any body already accumulated.
    pub fn update(&mut self, metadata: ResponseMetadata) {
        self.url = metadata.url;
        self.status = metadata.status;
        self.headers = metadata.headers;
        self.mime_type = metadata.mime_type;
        self.expected_content_length = metadata.expected_content_length;
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub fn set_resource_location(&mut self, location: &Path) {
        self.resource_location = Some(location.to_path_buf());
    }

    pub fn finalize(self) -> Response {
        Response {
            url: self.url,
            status: self.status,
            headers: self.headers,
            mime_type: self.mime_type,
            expected_content_length: self.expected_content_length,
            body: self.body.freeze(),
            resource_location: self.resource_location,
        }
    }
}

/// Immutable snapshot of a completed response, handed to callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: Option<String>,
    pub status: u16,
    pub headers: Vec<HttpHeader>,
    pub mime_type: Option<String>,
    /// `None` when the server did not announce a length.
    pub expected_content_length: Option<u64>,
    pub body: Bytes,
    /// Where a download was written, if the transport reported it.
    pub resource_location: Option<PathBuf>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}
