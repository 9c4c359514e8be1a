//! Request fingerprinting for cache keys.

use sha2::{Digest, Sha256};

use crate::net::Request;

/// Headers that participate in the cache key. Everything else (auth,
/// tracing, user-agent noise) is deliberately ignored so that equivalent
/// requests land on the same entry.
const RELEVANT_HEADERS: [&str; 2] = ["accept", "accept-language"];

/// Stable identity of a request: method + normalized URL + relevant headers.
///
/// Entries written at install time use bare requests (no headers), so
/// lookups for pre-populated resources must be built the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
  pub fn of(request: &Request) -> Self {
    let mut input = format!(
      "{}:{}",
      request.method.as_str(),
      normalize_url(&request.url)
    );

    for name in RELEVANT_HEADERS {
      if let Some(value) = request.header(name) {
        input.push(':');
        input.push_str(name);
        input.push('=');
        input.push_str(value.trim());
      }
    }

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    Fingerprint(hex::encode(result))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// Normalize a URL for consistent hashing.
fn normalize_url(url: &str) -> String {
  url.trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Request;

  #[test]
  fn test_same_request_same_fingerprint() {
    let a = Fingerprint::of(&Request::get("/api/flashcards/due"));
    let b = Fingerprint::of(&Request::get("/api/flashcards/due"));
    assert_eq!(a, b);
  }

  #[test]
  fn test_method_and_url_distinguish() {
    let get = Fingerprint::of(&Request::get("/api/progress/stats"));
    let post = Fingerprint::of(&Request::post("/api/progress/stats", ""));
    let other = Fingerprint::of(&Request::get("/api/progress/history"));
    assert_ne!(get, post);
    assert_ne!(get, other);
  }

  #[test]
  fn test_irrelevant_headers_ignored() {
    let bare = Fingerprint::of(&Request::get("/api/auth/me"));
    let with_auth = Fingerprint::of(&Request::get("/api/auth/me").with_header("Authorization", "Bearer x"));
    let with_accept = Fingerprint::of(&Request::get("/api/auth/me").with_header("Accept", "application/json"));
    assert_eq!(bare, with_auth);
    assert_ne!(bare, with_accept);
  }

  #[test]
  fn test_whitespace_normalized() {
    let a = Fingerprint::of(&Request::get(" /manifest.json "));
    let b = Fingerprint::of(&Request::get("/manifest.json"));
    assert_eq!(a, b);
  }
}
