//! The author/committer signature line embedded in commit and tag objects:
//! `<role> <name> <email> <timestamp> <timezone>`.

use std::fmt::Display;

use bincode::{Decode, Encode};
use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which role this signature plays within a commit or tag.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Decode, Encode)]
pub enum SignatureType {
    Author,
    Committer,
    Tagger,
}

impl SignatureType {
    fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Author => "author",
            SignatureType::Committer => "committer",
            SignatureType::Tagger => "tagger",
        }
    }

    fn from_str(s: &str) -> Result<Self, GitError> {
        match s {
            "author" => Ok(SignatureType::Author),
            "committer" => Ok(SignatureType::Committer),
            "tagger" => Ok(SignatureType::Tagger),
            _ => Err(GitError::InvalidSignatureType(s.to_string())),
        }
    }
}

/// Author/committer/tagger identity with a unix timestamp and timezone offset.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize, Decode, Encode)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    pub timestamp: usize,
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} <{}> {} {}",
            self.signature_type.as_str(),
            self.name,
            self.email,
            self.timestamp,
            self.timezone
        )
    }
}

impl Signature {
    /// Build a signature stamped with the current time (timezone fixed at `+0000`).
    pub fn new(signature_type: SignatureType, name: String, email: String) -> Self {
        Signature {
            signature_type,
            name,
            email,
            timestamp: chrono::Utc::now().timestamp() as usize,
            timezone: "+0000".to_string(),
        }
    }

    /// Parse a single signature line, e.g. `author benjamin.747 <b@x.com> 1757467768 +0800`.
    pub fn from_data(data: Vec<u8>) -> Result<Self, GitError> {
        let line = data.as_bstr();
        let role_end = line
            .find_byte(b' ')
            .ok_or_else(|| GitError::InvalidSignatureType("missing role".to_string()))?;
        let signature_type = SignatureType::from_str(
            std::str::from_utf8(&line[..role_end])
                .map_err(|e| GitError::ConversionError(e.to_string()))?,
        )?;

        let rest = &line[role_end + 1..];
        let email_start = rest
            .find_byte(b'<')
            .ok_or_else(|| GitError::InvalidCommit("missing signature email".to_string()))?;
        let email_end = rest
            .find_byte(b'>')
            .ok_or_else(|| GitError::InvalidCommit("unterminated signature email".to_string()))?;

        let name = rest[..email_start]
            .trim()
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?
            .to_string();
        let email = rest[email_start + 1..email_end]
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?
            .to_string();

        let tail = rest[email_end + 1..].trim();
        let mut parts = tail.split(|&b| b == b' ').filter(|p| !p.is_empty());
        let timestamp = parts
            .next()
            .and_then(|p| p.to_str().ok())
            .and_then(|p| p.parse::<usize>().ok())
            .ok_or_else(|| GitError::InvalidCommit("missing signature timestamp".to_string()))?;
        let timezone = parts
            .next()
            .and_then(|p| p.to_str().ok())
            .unwrap_or("+0000")
            .to_string();

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let line = b"author benjamin.747 <benjamin.747@outlook.com> 1757467768 +0800".to_vec();
        let sig = Signature::from_data(line.clone()).unwrap();
        assert_eq!(sig.signature_type, SignatureType::Author);
        assert_eq!(sig.name, "benjamin.747");
        assert_eq!(sig.email, "benjamin.747@outlook.com");
        assert_eq!(sig.timestamp, 1757467768);
        assert_eq!(sig.timezone, "+0800");
        assert_eq!(sig.to_data().unwrap(), line);
    }

    #[test]
    fn test_signature_new_has_role_in_display() {
        let sig = Signature::new(
            SignatureType::Committer,
            "tester".to_string(),
            "tester@example.com".to_string(),
        );
        assert!(sig.to_string().starts_with("committer tester <tester@example.com>"));
    }

    #[test]
    fn test_invalid_role_rejected() {
        let line = b"bogus name <e@x.com> 1 +0000".to_vec();
        assert!(Signature::from_data(line).is_err());
    }
}
