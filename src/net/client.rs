use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::types::{Method, Request, Response};

/// Network seam for everything that goes out to the remote API.
///
/// A transport-level failure (unreachable host, reset connection) is an
/// `Err`; a server answer of any status is an `Ok(Response)`. The strategy
/// layer decides what each means.
#[async_trait]
pub trait NetworkClient: Send + Sync {
  async fn send(&self, request: &Request) -> Result<Response>;
}

/// Remote API client backed by reqwest.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  base: Url,
}

impl HttpClient {
  pub fn new(base_url: &str) -> Result<Self> {
    let base = Url::parse(base_url).map_err(|e| eyre!("Invalid remote base URL {}: {}", base_url, e))?;
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  /// Resolve a logical URL against the remote base.
  fn resolve(&self, url: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(url) {
      return Ok(absolute);
    }
    self
      .base
      .join(url)
      .map_err(|e| eyre!("Cannot resolve {} against {}: {}", url, self.base, e))
  }
}

#[async_trait]
impl NetworkClient for HttpClient {
  async fn send(&self, request: &Request) -> Result<Response> {
    let url = self.resolve(&request.url)?;

    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self.client.request(method, url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).to_string(),
        )
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
pub(crate) mod mock {
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  use super::*;

  /// Scripted network for tests: fixed responses per URL, a global offline
  /// switch, and a record of every request sent.
  pub struct MockNetwork {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: Mutex<Vec<Request>>,
  }

  impl MockNetwork {
    pub fn new() -> Self {
      Self {
        routes: Mutex::new(HashMap::new()),
        offline: AtomicBool::new(false),
        calls: Mutex::new(Vec::new()),
      }
    }

    /// Set (or overwrite) the response served for a URL.
    pub fn respond(&self, url: &str, response: Response) {
      self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    /// Remove a URL's route so requests to it fail at the transport level.
    pub fn fail(&self, url: &str) {
      self.routes.lock().unwrap().remove(url);
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Request> {
      self.calls.lock().unwrap().clone()
    }

    /// Number of requests sent to a given URL.
    pub fn calls_to(&self, url: &str) -> usize {
      self
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.url == url)
        .count()
    }
  }

  #[async_trait]
  impl NetworkClient for MockNetwork {
    async fn send(&self, request: &Request) -> Result<Response> {
      self.calls.lock().unwrap().push(request.clone());

      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }

      match self.routes.lock().unwrap().get(&request.url) {
        Some(response) => Ok(response.clone()),
        None => Err(eyre!("no route for {}", request.url)),
      }
    }
  }
}
