//! Redacting secret wrapper.
//!
//! Config values that are credentials (database password, central API key)
//! are wrapped in [`Secret`] the moment they're parsed out of YAML, so a
//! stray `tracing::info!("{:?}", cfg)` or `#[derive(Debug)]` on a containing
//! struct can never print the plaintext. Modeled on
//! `mqk-config::secrets::ResolvedSecrets`'s hand-written `Debug` impl that
//! prints `<REDACTED>` for every secret-bearing field.

use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Secret(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<REDACTED>")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<REDACTED>")
    }
}
