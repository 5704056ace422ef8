//! Request signing for services that require a mixed-key query hash
//!
//! The signature is a pure function of the request parameters, a timestamp and
//! two server-issued keys:
//!
//! 1. The 64 characters of `img_key ‖ sub_key` are permuted by a fixed table
//!    and the first 32 characters form the mixing key
//! 2. `wts` (unix seconds) is added to the parameters
//! 3. Parameters are sorted by key and their values stripped of `!'()*`
//! 4. The form-encoded query is concatenated with the mixing key and hashed
//!    with MD5; the lowercase hex digest is `w_rid`
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use sumi_trawl::signing::sign;
//!
//! let mut params = BTreeMap::new();
//! params.insert("oid".to_string(), "1".to_string());
//!
//! let signed = sign(&params, &"ab".repeat(16), &"cd".repeat(16), 1_000_000_000).unwrap();
//! assert_eq!(signed.w_rid.len(), 32);
//! assert_eq!(signed.params["wts"], "1000000000");
//! ```

use std::collections::BTreeMap;
use thiserror::Error;
use url::form_urlencoded;

/// Permutation applied to `img_key ‖ sub_key` to derive the mixing key
pub const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Length of the derived mixing key
pub const MIXIN_KEY_LEN: usize = 32;

/// Characters removed from parameter values before encoding
const STRIPPED_CHARS: &[char] = &['!', '\'', '(', ')', '*'];

/// Errors produced while signing a request
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("signing keys must hold at least 64 characters together, got {0}")]
    KeyTooShort(usize),
}

/// Key pair issued by the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyPair {
    pub img_key: String,
    pub sub_key: String,
}

impl SigningKeyPair {
    pub fn new(img_key: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            img_key: img_key.into(),
            sub_key: sub_key.into(),
        }
    }

    /// Signs `params` at time `now` with this key pair
    pub fn sign(
        &self,
        params: &BTreeMap<String, String>,
        now: i64,
    ) -> Result<SignedParams, SigningError> {
        sign(params, &self.img_key, &self.sub_key, now)
    }
}

/// Parameters with the signature attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedParams {
    /// Original parameters plus `wts` and `w_rid`
    pub params: BTreeMap<String, String>,

    /// Timestamp that was signed
    pub wts: i64,

    /// Lowercase hex MD5 signature
    pub w_rid: String,
}

/// Derives the 32-character mixing key from the two service keys
pub fn mixin_key(img_key: &str, sub_key: &str) -> Result<String, SigningError> {
    let raw: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();
    if raw.len() < MIXIN_KEY_ENC_TAB.len() {
        return Err(SigningError::KeyTooShort(raw.len()));
    }

    Ok(MIXIN_KEY_ENC_TAB
        .iter()
        .take(MIXIN_KEY_LEN)
        .map(|&index| raw[index])
        .collect())
}

/// Builds the canonical `key=value&...` query that gets hashed
///
/// `BTreeMap` iteration is already sorted by key bytes.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| {
            let cleaned: String = value.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
            format!("{}={}", encode_component(key), encode_component(&cleaned))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Form-encodes one query component, keeping `~` literal like the service does
fn encode_component(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace("%7E", "~")
}

/// Signs request parameters
///
/// # Arguments
///
/// * `params` - The request parameters (not modified)
/// * `img_key` - First service key
/// * `sub_key` - Second service key
/// * `now` - Unix timestamp in seconds, used as `wts`
///
/// # Returns
///
/// * `Ok(SignedParams)` - Original parameters plus `wts` and `w_rid`
/// * `Err(SigningError)` - The keys are too short to mix
pub fn sign(
    params: &BTreeMap<String, String>,
    img_key: &str,
    sub_key: &str,
    now: i64,
) -> Result<SignedParams, SigningError> {
    let mixin = mixin_key(img_key, sub_key)?;

    let mut params = params.clone();
    params.insert("wts".to_string(), now.to_string());

    let query = canonical_query(&params);
    let w_rid = format!("{:x}", md5::compute(format!("{}{}", query, mixin)));
    params.insert("w_rid".to_string(), w_rid.clone());

    Ok(SignedParams {
        params,
        wts: now,
        w_rid,
    })
}
