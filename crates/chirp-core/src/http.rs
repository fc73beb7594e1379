//! Shared HTTP client construction for consistent timeout and TLS
//! configuration across surfaces.

use std::time::Duration;

/// Create an HTTP client with standard chirp configuration.
///
/// # Panics
///
/// Panics if the TLS backend cannot be initialized (should never happen
/// with rustls).
#[must_use]
pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("chirp/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .expect("default HTTP client construction must not fail")
}
