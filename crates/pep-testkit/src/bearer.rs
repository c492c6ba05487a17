//! Bearer-token fixtures — spec.md §6.
//!
//! `pep-server` only base64url-decodes the claims payload (verification
//! happens upstream), so a test's "token" is just that encoding, with no
//! signature segment required.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use pep_schemas::AuthClaims;

/// Encodes `claims` the way `pep-server`'s auth extractor expects to decode
/// them: a bare base64url (no padding) JSON blob, usable directly as the
/// `Authorization: Bearer <token>` value.
pub fn bearer_token(claims: &AuthClaims) -> String {
    let json = serde_json::to_vec(claims).expect("AuthClaims always serializes");
    URL_SAFE_NO_PAD.encode(json)
}
