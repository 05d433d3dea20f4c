//! Decryption of the obfuscated download links returned by the site API
//!
//! The site hides direct file URLs behind a small XOR scheme keyed on the
//! hour the payload was issued. The scheme changes from time to time, so it
//! sits behind the [`UrlCipher`] trait and the resolver only ever talks to
//! the trait.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

/// Encrypted link payload as returned by the API endpoint
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Whether `url` is encrypted (`false` means it is usable as-is)
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
    /// Unix timestamp the payload was issued at
    #[serde(default)]
    pub timestamp: i64,
    /// Base64 ciphertext, or the plain URL when not encrypted
    pub url: String,
}

fn default_encrypted() -> bool {
    true
}

/// Failure to decode a payload
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    /// The ciphertext is not valid base64
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    /// The decrypted bytes are not valid UTF-8
    #[error("decrypted link is not valid UTF-8")]
    Utf8,
    /// The payload decrypted to an empty link
    #[error("decrypted link is empty")]
    Empty,
}

/// Turns an [`EncryptedPayload`] into a direct download URL
pub trait UrlCipher: Send + Sync {
    /// Decrypt the payload
    fn decrypt(&self, payload: &EncryptedPayload) -> Result<String, CipherError>;
}

/// Current scheme: base64, then byte-wise XOR with `SECRET_KEY_<hour>`
#[derive(Clone, Debug, Default)]
pub struct XorTimestampCipher;

impl XorTimestampCipher {
    /// Key for a payload issued at `timestamp`
    pub fn key_for(timestamp: i64) -> String {
        format!("SECRET_KEY_{}", timestamp.div_euclid(3600))
    }

    /// XOR `data` with `key` cycled over its length
    pub fn xor(data: &[u8], key: &[u8]) -> Vec<u8> {
        if key.is_empty() {
            return data.to_vec();
        }
        data.iter()
            .zip(key.iter().cycle())
            .map(|(byte, k)| byte ^ k)
            .collect()
    }
}

impl UrlCipher for XorTimestampCipher {
    fn decrypt(&self, payload: &EncryptedPayload) -> Result<String, CipherError> {
        if !payload.encrypted {
            if payload.url.is_empty() {
                return Err(CipherError::Empty);
            }
            return Ok(payload.url.clone());
        }

        let encrypted = STANDARD
            .decode(payload.url.trim())
            .map_err(|e| CipherError::Base64(e.to_string()))?;
        let key = Self::key_for(payload.timestamp);
        let decrypted = Self::xor(&encrypted, key.as_bytes());
        let url = String::from_utf8(decrypted).map_err(|_| CipherError::Utf8)?;

        if url.is_empty() {
            return Err(CipherError::Empty);
        }
        Ok(url)
    }
}

/// Encrypt `url` the way the site does; used to build fixtures
#[cfg(test)]
pub(crate) fn encrypt_for_tests(url: &str, timestamp: i64) -> String {
    let key = XorTimestampCipher::key_for(timestamp);
    STANDARD.encode(XorTimestampCipher::xor(url.as_bytes(), key.as_bytes()))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_hour_bucket() {
        assert_eq!(XorTimestampCipher::key_for(7199), "SECRET_KEY_1");
        assert_eq!(XorTimestampCipher::key_for(7200), "SECRET_KEY_2");
    }

    #[test]
    fn decrypts_known_payload() {
        let timestamp = 1_700_000_000;
        let url = "https://cdn12.bunkr.ru/video-AbC.mp4";
        let payload = EncryptedPayload {
            encrypted: true,
            timestamp,
            url: encrypt_for_tests(url, timestamp),
        };

        assert_eq!(XorTimestampCipher.decrypt(&payload).unwrap(), url);
    }

    #[test]
    fn multibyte_urls_survive_decryption() {
        let timestamp = 1_712_345_678;
        let url = "https://cdn3.bunkr.ru/фото-日本-😀.jpg";
        let payload = EncryptedPayload {
            encrypted: true,
            timestamp,
            url: encrypt_for_tests(url, timestamp),
        };

        assert_eq!(XorTimestampCipher.decrypt(&payload).unwrap(), url);
    }

    #[test]
    fn wrong_hour_does_not_round_trip() {
        let url = "https://cdn3.bunkr.ru/a.jpg";
        let payload = EncryptedPayload {
            encrypted: true,
            timestamp: 3600 * 10,
            url: encrypt_for_tests(url, 3600 * 11),
        };

        assert_ne!(XorTimestampCipher.decrypt(&payload).ok().as_deref(), Some(url));
    }

    #[test]
    fn unencrypted_payload_is_used_verbatim() {
        let payload: EncryptedPayload =
            serde_json::from_str(r#"{"encrypted": false, "url": "https://cdn1.bunkr.ru/x.zip"}"#)
                .unwrap();
        assert_eq!(
            XorTimestampCipher.decrypt(&payload).unwrap(),
            "https://cdn1.bunkr.ru/x.zip"
        );
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let payload = EncryptedPayload {
            encrypted: true,
            timestamp: 0,
            url: "not base64!!".to_string(),
        };
        assert!(matches!(
            XorTimestampCipher.decrypt(&payload),
            Err(CipherError::Base64(_))
        ));
    }
}
