//! Logical request and response types exchanged with the engine.
//!
//! The application layer hands the engine a `Request`; the engine always
//! hands back a `Response`, whether it came from the network, a cache
//! region, or was synthesized because neither was available.

use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP-style request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Whether this method changes state on the remote side.
  /// Only mutating requests are ever captured by the write queue.
  pub fn is_mutating(&self) -> bool {
    matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }

  /// Parse from the wire/storage representation.
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "GET" => Some(Self::Get),
      "HEAD" => Some(Self::Head),
      "POST" => Some(Self::Post),
      "PUT" => Some(Self::Put),
      "PATCH" => Some(Self::Patch),
      "DELETE" => Some(Self::Delete),
      _ => None,
    }
  }
}

/// A logical request issued by the application layer.
///
/// The URL may be a bare path (`/api/progress/stats`) or absolute; bare
/// paths are resolved against the configured remote base URL when the
/// request actually goes out on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      method: Method::Post,
      url: url.into(),
      headers: Vec::new(),
      body: Some(body.into()),
    }
  }

  /// Attach a header.
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Look up a header value, case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// The path component of the URL, used for strategy classification.
  pub fn path(&self) -> String {
    if let Ok(parsed) = Url::parse(&self.url) {
      parsed.path().to_string()
    } else {
      // Bare path: strip any query string
      self.url.split('?').next().unwrap_or("").to_string()
    }
  }

  /// Whether the caller expects a full document (navigation-style request).
  /// Drives the offline landing fallback for static misses.
  pub fn expects_document(&self) -> bool {
    self
      .header("accept")
      .map(|v| v.contains("text/html"))
      .unwrap_or(false)
  }
}

/// A response snapshot: status, headers, body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Success-class (2xx) status. Anything else is a strategy-level failure.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Look up a header value, case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Synthetic placeholder returned when the network is down and no cache
  /// entry exists. Callers can tell it apart from real data both by the
  /// `offline` flag in the body and by the route result's source marker.
  pub fn offline_placeholder() -> Self {
    let body = serde_json::json!({
      "offline": true,
      "message": "Data unavailable offline",
    });
    Self::new(200, body.to_string()).with_header("Content-Type", "application/json")
  }

  /// Confirmation for a mutating request accepted into the write queue.
  pub fn queued(id: i64) -> Self {
    let body = serde_json::json!({
      "queued": true,
      "id": id,
    });
    Self::new(202, body.to_string()).with_header("Content-Type", "application/json")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mutating_methods() {
    assert!(!Method::Get.is_mutating());
    assert!(!Method::Head.is_mutating());
    assert!(Method::Post.is_mutating());
    assert!(Method::Delete.is_mutating());
  }

  #[test]
  fn test_method_parse_round_trip() {
    for method in [
      Method::Get,
      Method::Head,
      Method::Post,
      Method::Put,
      Method::Patch,
      Method::Delete,
    ] {
      assert_eq!(Method::parse(method.as_str()), Some(method));
    }
    assert_eq!(Method::parse("TRACE"), None);
  }

  #[test]
  fn test_path_from_bare_and_absolute_urls() {
    assert_eq!(Request::get("/api/questions/session").path(), "/api/questions/session");
    assert_eq!(Request::get("/app.bundle?v=3").path(), "/app.bundle");
    assert_eq!(
      Request::get("https://api.medstudy.example/api/auth/me?x=1").path(),
      "/api/auth/me"
    );
  }

  #[test]
  fn test_expects_document() {
    let page = Request::get("/").with_header("Accept", "text/html,application/xhtml+xml");
    let api = Request::get("/api/auth/me").with_header("Accept", "application/json");
    assert!(page.expects_document());
    assert!(!api.expects_document());
    assert!(!Request::get("/").expects_document());
  }

  #[test]
  fn test_offline_placeholder_is_well_formed() {
    let response = Response::offline_placeholder();
    assert!(response.is_success());
    assert_eq!(response.header("content-type"), Some("application/json"));
    let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(value["offline"], true);
  }
}
