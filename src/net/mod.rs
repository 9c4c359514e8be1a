//! Network layer: logical request/response types and the remote API seam.

pub mod client;
pub mod types;

pub use client::{HttpClient, NetworkClient};
pub use types::{Method, Request, Response};
