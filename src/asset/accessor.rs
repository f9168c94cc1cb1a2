//! The byte-retrieval contract between the engine and its transport

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::error::Error;
use crate::core::types::Result;

/// A completed HTTP-like response
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub status_code: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub data: Vec<u8>,
}

impl Response {
    pub fn ok(content_type: &str, data: Vec<u8>) -> Self {
        Self {
            status_code: 200,
            content_type: content_type.to_string(),
            headers: Vec::new(),
            data,
        }
    }

    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    /// Status 0 means a transport without status codes (file, memory)
    pub fn is_success(&self) -> bool {
        self.status_code == 0 || (200..300).contains(&self.status_code)
    }
}

/// Single external contract for byte retrieval
///
/// `get` is called from worker tasks and may block on I/O. `tick` is called
/// once per frame on the main thread to advance transports that need
/// pumping; the default is a no-op.
pub trait AssetAccessor: Send + Sync {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<Response>;

    fn tick(&self) {}
}

/// An in-memory accessor serving preloaded responses
///
/// Unknown URLs produce a network error. Every request is recorded, so
/// tests can assert on what was fetched and how often.
#[derive(Default)]
pub struct StaticAccessor {
    responses: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<String>>,
}

impl StaticAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// All URLs requested so far, in order
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// How many times the given URL has been requested
    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

impl AssetAccessor for StaticAccessor {
    fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<Response> {
        self.requests.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Network {
                url: url.to_string(),
                reason: "no response configured".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_accessor_serves_and_records() {
        let accessor = StaticAccessor::new();
        accessor.insert("https://example.com/a", Response::ok("text/plain", b"hi".to_vec()));

        let response = accessor.get("https://example.com/a", &[]).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.data, b"hi");

        accessor.get("https://example.com/a", &[]).unwrap();
        assert_eq!(accessor.request_count("https://example.com/a"), 2);
    }

    #[test]
    fn test_static_accessor_unknown_url() {
        let accessor = StaticAccessor::new();
        let err = accessor.get("https://example.com/missing", &[]).unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
        assert_eq!(accessor.requested_urls().len(), 1);
    }

    #[test]
    fn test_success_statuses() {
        assert!(Response::with_status(0).is_success());
        assert!(Response::with_status(200).is_success());
        assert!(Response::with_status(204).is_success());
        assert!(!Response::with_status(301).is_success());
        assert!(!Response::with_status(401).is_success());
        assert!(!Response::with_status(500).is_success());
    }
}
