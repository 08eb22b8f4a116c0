//! Versioned encryption envelope for message content.
//!
//! Classification rules, in order:
//!
//! 1. Not a JSON object, or `encrypted` is not `true` -> legacy plaintext
//! 2. `version` is not [`ENVELOPE_VERSION`] -> undecodable (never guessed at)
//! 3. Fields missing or mistyped -> undecodable
//! 4. Otherwise -> encrypted payload
//!
//! Unknown extra fields are ignored so that additive changes stay readable.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// The only envelope version this build produces and accepts.
pub const ENVELOPE_VERSION: u32 = 1;

/// Decoded encryption envelope.
///
/// The fixed `encrypted: true` and `version: 1` fields are implied by the
/// type and written by [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// `base64(IV ‖ ciphertext ‖ tag)` of the message text
    pub ciphertext: String,

    /// Whether the blob behind the message's `media_url` is encrypted
    pub media_encrypted: Option<bool>,

    /// MIME type of the media before encryption
    pub original_media_type: Option<String>,
}

impl EncryptedPayload {
    /// Build a text-only payload from sealed bytes.
    pub fn from_sealed(sealed: &[u8]) -> Self {
        Self { ciphertext: STANDARD.encode(sealed), media_encrypted: None, original_media_type: None }
    }

    /// Mark the payload as carrying an encrypted attachment of `media_type`.
    #[must_use]
    pub fn with_encrypted_media(mut self, media_type: impl Into<String>) -> Self {
        self.media_encrypted = Some(true);
        self.original_media_type = Some(media_type.into());
        self
    }

    /// Whether the attachment must be decrypted before display.
    pub fn declares_encrypted_media(&self) -> bool {
        self.media_encrypted == Some(true)
    }

    /// Decode the base64 ciphertext into sealed bytes.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        STANDARD.decode(&self.ciphertext).map_err(|e| DecodeError::InvalidCiphertext(e.to_string()))
    }

    /// Serialize into envelope JSON. See [`encode`].
    pub fn to_json(&self) -> String {
        encode(&self.ciphertext, self.media_encrypted, self.original_media_type.as_deref())
    }
}

/// Classification of a message's `content` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Not an envelope. Display verbatim.
    Legacy,
    /// Valid v1 envelope.
    Encrypted(EncryptedPayload),
    /// Claims `encrypted: true` but cannot be used. Display verbatim.
    Undecodable(DecodeError),
}

/// On-wire field layout. Field order is the serialized order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelopeRef<'a> {
    encrypted: bool,
    version: u32,
    ciphertext: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_encrypted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_media_type: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    ciphertext: String,
    #[serde(default)]
    media_encrypted: Option<bool>,
    #[serde(default)]
    original_media_type: Option<String>,
}

/// Serialize an envelope with `encrypted: true` and `version: 1`.
///
/// Absent optional fields are omitted from the output.
pub fn encode(
    ciphertext_b64: &str,
    media_encrypted: Option<bool>,
    original_media_type: Option<&str>,
) -> String {
    let wire = WireEnvelopeRef {
        encrypted: true,
        version: ENVELOPE_VERSION,
        ciphertext: ciphertext_b64,
        media_encrypted,
        original_media_type,
    };

    let Ok(json) = serde_json::to_string(&wire) else {
        unreachable!("envelope of strings and bools always serializes");
    };
    json
}

/// Check whether content is a v1 envelope.
///
/// Only `encrypted == true && version == 1` is checked. Any parse failure or
/// shape mismatch returns `false`.
pub fn is_encrypted(content: &str) -> bool {
    match envelope_object(content) {
        Ok(object) => has_current_version(&object),
        Err(_) => false,
    }
}

/// Decode content as a v1 envelope.
///
/// # Errors
///
/// - `NotJson`, `NotEnvelope`: legacy plaintext
/// - `UnsupportedVersion`: envelope from a different version
/// - `Malformed`: required field missing or wrong type
pub fn decode(content: &str) -> Result<EncryptedPayload, DecodeError> {
    let object = envelope_object(content)?;

    if !has_current_version(&object) {
        let version = object.get("version").map_or_else(|| "missing".to_owned(), Value::to_string);
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let wire: WireEnvelope = serde_json::from_value(Value::Object(object))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    Ok(EncryptedPayload {
        ciphertext: wire.ciphertext,
        media_encrypted: wire.media_encrypted,
        original_media_type: wire.original_media_type,
    })
}

/// Classify content into legacy, encrypted, or undecodable.
pub fn classify(content: &str) -> MessageContent {
    match decode(content) {
        Ok(payload) => MessageContent::Encrypted(payload),
        Err(DecodeError::NotJson | DecodeError::NotEnvelope) => MessageContent::Legacy,
        Err(err) => MessageContent::Undecodable(err),
    }
}

/// Parse content into a JSON object that claims `encrypted: true`.
fn envelope_object(content: &str) -> Result<Map<String, Value>, DecodeError> {
    // Cheap reject for the common legacy case
    if !content.trim_start().starts_with('{') {
        return Err(DecodeError::NotJson);
    }

    let value: Value = serde_json::from_str(content).map_err(|_| DecodeError::NotJson)?;
    let Value::Object(object) = value else {
        return Err(DecodeError::NotEnvelope);
    };

    if object.get("encrypted") != Some(&Value::Bool(true)) {
        return Err(DecodeError::NotEnvelope);
    }

    Ok(object)
}

/// JSON has one number type, so `1.0` is the same version as `1`.
#[allow(clippy::float_cmp)]
fn has_current_version(object: &Map<String, Value>) -> bool {
    object
        .get("version")
        .and_then(Value::as_f64)
        .is_some_and(|version| version == f64::from(ENVELOPE_VERSION))
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn encode_text_only_envelope() {
        assert_snapshot!(
            encode("AAECAwQ=", None, None),
            @r#"{"encrypted":true,"version":1,"ciphertext":"AAECAwQ="}"#
        );
    }

    #[test]
    fn encode_media_envelope() {
        assert_snapshot!(
            encode("AAECAwQ=", Some(true), Some("image/png")),
            @r#"{"encrypted":true,"version":1,"ciphertext":"AAECAwQ=","mediaEncrypted":true,"originalMediaType":"image/png"}"#
        );
    }

    #[test]
    fn decode_reproduces_encoded_fields() {
        let payload = EncryptedPayload::from_sealed(&[1, 2, 3, 4]).with_encrypted_media("video/mp4");
        let decoded = decode(&payload.to_json()).unwrap();

        assert_eq!(decoded, payload);
        assert_eq!(decoded.ciphertext_bytes().unwrap(), vec![1, 2, 3, 4]);
        assert!(decoded.declares_encrypted_media());
    }

    #[test]
    fn is_encrypted_accepts_v1_envelopes() {
        assert!(is_encrypted(&encode("abc", None, None)));
        assert!(is_encrypted(&encode("abc", Some(false), None)));
    }

    #[test]
    fn is_encrypted_rejects_everything_else() {
        assert!(!is_encrypted("not json"));
        assert!(!is_encrypted("{}"));
        assert!(!is_encrypted(""));
        assert!(!is_encrypted("[1,2,3]"));
        assert!(!is_encrypted("{\"encrypted\":\"true\",\"version\":1}"));
        assert!(!is_encrypted("{\"encrypted\":false,\"version\":1,\"ciphertext\":\"x\"}"));
        assert!(!is_encrypted("{\"encrypted\":true,\"version\":2,\"ciphertext\":\"x\"}"));
        assert!(!is_encrypted("{\"encrypted\":true,\"version\":\"1\",\"ciphertext\":\"x\"}"));
    }

    #[test]
    fn classify_plain_strings_as_legacy() {
        assert_eq!(classify("hello there"), MessageContent::Legacy);
        assert_eq!(classify("{not really json"), MessageContent::Legacy);
        assert_eq!(classify("{}"), MessageContent::Legacy);
        assert_eq!(classify("{\"text\":\"hi\"}"), MessageContent::Legacy);
    }

    #[test]
    fn classify_unknown_version_as_undecodable() {
        let content = "{\"encrypted\":true,\"version\":2,\"ciphertext\":\"AAAA\"}";
        assert_eq!(
            classify(content),
            MessageContent::Undecodable(DecodeError::UnsupportedVersion("2".into()))
        );

        let missing = "{\"encrypted\":true,\"ciphertext\":\"AAAA\"}";
        assert_eq!(
            classify(missing),
            MessageContent::Undecodable(DecodeError::UnsupportedVersion("missing".into()))
        );
    }

    #[test]
    fn float_version_one_is_current() {
        let content = "{\"encrypted\":true,\"version\":1.0,\"ciphertext\":\"AAAA\"}";
        assert!(is_encrypted(content));
        assert_eq!(decode(content).unwrap().ciphertext, "AAAA");

        let fractional = "{\"encrypted\":true,\"version\":1.5,\"ciphertext\":\"AAAA\"}";
        assert!(!is_encrypted(fractional));
        assert_eq!(
            classify(fractional),
            MessageContent::Undecodable(DecodeError::UnsupportedVersion("1.5".into()))
        );
    }

    #[test]
    fn classify_missing_ciphertext_as_malformed() {
        let content = "{\"encrypted\":true,\"version\":1}";
        assert!(matches!(classify(content), MessageContent::Undecodable(DecodeError::Malformed(_))));
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let content = "{\"encrypted\":true,\"version\":1,\"ciphertext\":\"AAAA\",\"future\":42}";
        let payload = decode(content).unwrap();

        assert_eq!(payload.ciphertext, "AAAA");
        assert_eq!(payload.media_encrypted, None);
    }

    #[test]
    fn invalid_base64_is_reported_on_access() {
        let payload = decode(&encode("***", None, None)).unwrap();
        assert!(matches!(payload.ciphertext_bytes(), Err(DecodeError::InvalidCiphertext(_))));
    }
}
