//! Strong type definitions for credit sync.
//!
//! Identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Domain separator for event id derivation.
const EVENT_ID_DOMAIN: &[u8] = b"credit-sync-event-v0:";

/// A 32-byte event identifier.
///
/// Derived as Blake3(domain || email || credits || produced_at || nonce) when a
/// producer creates an event. A retried publish of the same event value keeps
/// the same id, so consumers can recognise redeliveries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub [u8; 32]);

impl EventId {
    /// Derive an event id from the event content and a producer nonce.
    pub fn derive(email: &Email, credits: i64, produced_at: i64, nonce: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(EVENT_ID_DOMAIN);
        hasher.update(email.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(&credits.to_be_bytes());
        hasher.update(&produced_at.to_be_bytes());
        hasher.update(&nonce.to_be_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a new EventId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl From<[u8; 32]> for EventId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for EventId {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// A normalized email address identifying a user account.
///
/// Trimmed and lower-cased on construction, so addresses differing only in
/// case name the same account. Also used as the message key, so every event
/// for one account lands on the same partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Parse and normalize an email address.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let normalized = raw.trim().to_ascii_lowercase();
        let mut parts = normalized.split('@');
        let local = parts.next().unwrap_or_default();
        let domain = parts.next().unwrap_or_default();

        if local.is_empty() || domain.is_empty() || parts.next().is_some() {
            return Err(CoreError::InvalidEmail(raw.to_string()));
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidEmail(raw.to_string()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Email {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl std::str::FromStr for Email {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_hex_roundtrip() {
        let id = EventId::from_bytes([0x42; 32]);
        let hex = id.to_hex();
        let recovered = EventId::from_hex(&hex).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_event_id_display() {
        let id = EventId::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", id), "abababababababab");
        assert!(format!("{:?}", id).starts_with("EventId("));
    }

    #[test]
    fn test_event_id_derivation() {
        let email = Email::parse("a@x.com").unwrap();
        let id1 = EventId::derive(&email, 10, 1000, 7);
        let id2 = EventId::derive(&email, 10, 1000, 7);
        let id3 = EventId::derive(&email, 10, 1000, 8);

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_email_normalized() {
        let email = Email::parse("  A@X.com ").unwrap();
        assert_eq!(email.as_str(), "a@x.com");
    }

    #[test]
    fn test_case_variants_are_one_account() {
        let upper = Email::parse("Jane.Doe@Example.COM").unwrap();
        let lower = Email::parse("jane.doe@example.com").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), "jane.doe@example.com");
    }

    #[test]
    fn test_email_rejects_garbage() {
        assert!(Email::parse("").is_err());
        assert!(Email::parse("no-at-sign").is_err());
        assert!(Email::parse("@x.com").is_err());
        assert!(Email::parse("a@").is_err());
        assert!(Email::parse("a@b@c").is_err());
        assert!(Email::parse("a b@x.com").is_err());
    }

    #[test]
    fn test_email_serde() {
        let email: Email = serde_json::from_str("\"A@X.COM\"").unwrap();
        assert_eq!(email.as_str(), "a@x.com");
        assert!(serde_json::from_str::<Email>("\"nope\"").is_err());
    }
}
