//! Mapping between secret records and the store's native layouts
//!
//! Two layouts exist, chosen per record by [`ConsumeStrategy`]:
//!
//! - **Counted**: a hash at `{prefix}:{token}:views` with string-keyed scalar
//!   fields, so the store can increment `current_views` in place.
//! - **Fetch-and-delete**: a single value at `{prefix}:{token}` consumed by one
//!   atomic `GETDEL`. Counted deployments store a JSON envelope there; legacy
//!   deployments store the raw ciphertext.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ReadMode;

/// Hash field holding the ciphertext
pub const FIELD_CIPHERTEXT: &str = "ciphertext";
/// Hash field holding the view budget
pub const FIELD_MAX_VIEWS: &str = "max_views";
/// Hash field holding the successful-read counter
pub const FIELD_CURRENT_VIEWS: &str = "current_views";
/// Hash field holding the optional notification target
pub const FIELD_NOTIFY_TARGET: &str = "notify_target";
/// Hash field holding the creation timestamp (Unix seconds)
pub const FIELD_CREATED_AT: &str = "created_at";

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Required field absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Field is not a valid integer
    #[error("field {field} is not a valid integer: {value:?}")]
    InvalidInteger {
        /// Field name
        field: &'static str,
        /// Raw stored value
        value: String,
    },

    /// Field is not valid UTF-8
    #[error("field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// Envelope could not be (de)serialized
    #[error("envelope: {0}")]
    Envelope(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Envelope(err.to_string())
    }
}

/// How a record is consumed, fixed when it is created
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeStrategy {
    /// Single atomic fetch-and-delete
    FetchAndDelete,
    /// Atomic increment with delete at the budget
    Counted,
}

impl ConsumeStrategy {
    /// Pick the strategy for a new record
    pub fn select(max_views: u32, mode: ReadMode) -> Self {
        match mode {
            ReadMode::Legacy => ConsumeStrategy::FetchAndDelete,
            ReadMode::Counted if max_views <= 1 => ConsumeStrategy::FetchAndDelete,
            ReadMode::Counted => ConsumeStrategy::Counted,
        }
    }
}

/// A stored one-time secret
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Client-encrypted payload; opaque to the relay
    pub ciphertext: String,
    /// Total permitted successful reads
    #[serde(default = "default_max_views")]
    pub max_views: u32,
    /// Successful reads so far
    #[serde(default)]
    pub current_views: u32,
    /// Contact for the burn notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_target: Option<String>,
    /// Creation time (Unix seconds), absent on legacy records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

fn default_max_views() -> u32 {
    crate::DEFAULT_MAX_VIEWS
}

impl SecretRecord {
    /// Create a fresh record with no reads
    pub fn new(ciphertext: String, max_views: u32, notify_target: Option<String>) -> Self {
        Self {
            ciphertext,
            max_views,
            current_views: 0,
            notify_target,
            created_at: Some(chrono::Utc::now().timestamp()),
        }
    }
}

/// Key naming for one deployment
#[derive(Clone, Debug)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Create a key space; an empty prefix yields bare token keys
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key of a fetch-and-delete record
    pub fn single_shot(&self, token: &str) -> String {
        if self.prefix.is_empty() {
            token.to_string()
        } else {
            format!("{}:{}", self.prefix, token)
        }
    }

    /// Key of a counted record
    pub fn counted(&self, token: &str) -> String {
        format!("{}:views", self.single_shot(token))
    }
}

/// Flatten a record into hash fields
pub fn to_fields(record: &SecretRecord) -> Vec<(String, Vec<u8>)> {
    let mut fields = vec![
        (
            FIELD_CIPHERTEXT.to_string(),
            record.ciphertext.clone().into_bytes(),
        ),
        (
            FIELD_MAX_VIEWS.to_string(),
            record.max_views.to_string().into_bytes(),
        ),
        (
            FIELD_CURRENT_VIEWS.to_string(),
            record.current_views.to_string().into_bytes(),
        ),
    ];
    if let Some(target) = &record.notify_target {
        fields.push((FIELD_NOTIFY_TARGET.to_string(), target.clone().into_bytes()));
    }
    if let Some(created_at) = record.created_at {
        fields.push((
            FIELD_CREATED_AT.to_string(),
            created_at.to_string().into_bytes(),
        ));
    }
    fields
}

/// Rebuild a record from hash fields; an empty hash means no record
pub fn from_fields(fields: &HashMap<String, Vec<u8>>) -> Result<Option<SecretRecord>, CodecError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let ciphertext = text_field(fields, FIELD_CIPHERTEXT)?
        .ok_or(CodecError::MissingField(FIELD_CIPHERTEXT))?;
    let max_views = int_field(fields, FIELD_MAX_VIEWS)?.unwrap_or(crate::DEFAULT_MAX_VIEWS);
    let current_views = int_field(fields, FIELD_CURRENT_VIEWS)?.unwrap_or(0);
    let notify_target = text_field(fields, FIELD_NOTIFY_TARGET)?.filter(|t| !t.is_empty());
    let created_at = int_field(fields, FIELD_CREATED_AT)?;

    Ok(Some(SecretRecord {
        ciphertext,
        max_views,
        current_views,
        notify_target,
        created_at,
    }))
}

/// Serialize a record for the fetch-and-delete layout
pub fn to_envelope(record: &SecretRecord) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(record)?)
}

/// Deserialize a fetch-and-delete value
pub fn from_envelope(bytes: &[u8]) -> Result<SecretRecord, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Wrap a raw legacy blob as a single-view record
pub fn from_legacy_blob(bytes: Vec<u8>) -> Result<SecretRecord, CodecError> {
    let ciphertext =
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8(FIELD_CIPHERTEXT))?;
    Ok(SecretRecord {
        ciphertext,
        max_views: 1,
        current_views: 0,
        notify_target: None,
        created_at: None,
    })
}

fn text_field(
    fields: &HashMap<String, Vec<u8>>,
    name: &'static str,
) -> Result<Option<String>, CodecError> {
    fields
        .get(name)
        .map(|raw| String::from_utf8(raw.clone()).map_err(|_| CodecError::InvalidUtf8(name)))
        .transpose()
}

fn int_field<T: std::str::FromStr>(
    fields: &HashMap<String, Vec<u8>>,
    name: &'static str,
) -> Result<Option<T>, CodecError> {
    match text_field(fields, name)? {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CodecError::InvalidInteger {
                field: name,
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_fields_roundtrip_keeps_optional_target() {
        let record = SecretRecord::new("AES256:abc".into(), 3, Some("ops@example.com".into()));
        let flat: HashMap<_, _> = to_fields(&record).into_iter().collect();

        assert_eq!(flat[FIELD_MAX_VIEWS], b"3");
        assert_eq!(flat[FIELD_CURRENT_VIEWS], b"0");
        assert_eq!(from_fields(&flat).unwrap(), Some(record));
    }

    #[test]
    fn test_absent_optional_fields_are_tolerated() {
        let record = from_fields(&fields(&[("ciphertext", "blob")]))
            .unwrap()
            .unwrap();
        assert_eq!(record.max_views, 1);
        assert_eq!(record.current_views, 0);
        assert_eq!(record.notify_target, None);
        assert_eq!(record.created_at, None);
    }

    #[test]
    fn test_empty_hash_is_no_record() {
        assert_eq!(from_fields(&HashMap::new()).unwrap(), None);
    }

    #[test]
    fn test_blank_target_means_unused() {
        let record = from_fields(&fields(&[("ciphertext", "x"), ("notify_target", "")]))
            .unwrap()
            .unwrap();
        assert_eq!(record.notify_target, None);
    }

    #[test]
    fn test_missing_ciphertext_is_error() {
        let err = from_fields(&fields(&[("current_views", "4")])).unwrap_err();
        assert!(matches!(err, CodecError::MissingField(FIELD_CIPHERTEXT)));
    }

    #[test]
    fn test_bad_integer_is_error() {
        let err = from_fields(&fields(&[("ciphertext", "x"), ("max_views", "many")])).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidInteger {
                field: FIELD_MAX_VIEWS,
                ..
            }
        ));
    }

    #[test]
    fn test_envelope_tolerates_minimal_json() {
        let record = from_envelope(br#"{"ciphertext":"c"}"#).unwrap();
        assert_eq!(record.max_views, 1);
        assert_eq!(record.notify_target, None);
    }

    #[test]
    fn test_legacy_blob() {
        let record = from_legacy_blob(b"raw-ciphertext".to_vec()).unwrap();
        assert_eq!(record.ciphertext, "raw-ciphertext");
        assert_eq!(record.max_views, 1);
        assert!(from_legacy_blob(vec![0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            ConsumeStrategy::select(1, ReadMode::Counted),
            ConsumeStrategy::FetchAndDelete
        );
        assert_eq!(
            ConsumeStrategy::select(2, ReadMode::Counted),
            ConsumeStrategy::Counted
        );
        assert_eq!(
            ConsumeStrategy::select(5, ReadMode::Legacy),
            ConsumeStrategy::FetchAndDelete
        );
    }

    #[test]
    fn test_key_space() {
        let keys = KeySpace::new("ots");
        assert_eq!(keys.single_shot("t1"), "ots:t1");
        assert_eq!(keys.counted("t1"), "ots:t1:views");

        let bare = KeySpace::new("");
        assert_eq!(bare.single_shot("t1"), "t1");
        assert_eq!(bare.counted("t1"), "t1:views");
    }
}
