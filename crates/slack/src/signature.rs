//! Slack request signing (`v0`): HMAC-SHA256 over `v0:{timestamp}:{body}`.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_VERSION: &str = "v0";
/// Requests older (or newer) than this are treated as replays.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("request timestamp is not a unix time")]
    InvalidTimestamp,
    #[error("request timestamp is {age_secs}s away from now")]
    Stale { age_secs: i64 },
    #[error("signature is not a `v0=` hex digest")]
    Malformed,
    #[error("signature does not match the request body")]
    Mismatch,
}

pub struct SignatureVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret, tolerance_secs: DEFAULT_TOLERANCE_SECS }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
        let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;

        let sent_at: i64 =
            timestamp.trim().parse().map_err(|_| SignatureError::InvalidTimestamp)?;
        let age_secs = now_unix - sent_at;
        if age_secs.abs() > self.tolerance_secs {
            return Err(SignatureError::Stale { age_secs });
        }

        let digest = signature
            .trim()
            .strip_prefix("v0=")
            .and_then(decode_hex)
            .ok_or(SignatureError::Malformed)?;

        self.mac(timestamp.trim(), body)?
            .verify_slice(&digest)
            .map_err(|_| SignatureError::Mismatch)
    }

    /// The `X-Slack-Signature` value Slack would send for this body.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        let digest = self.mac(timestamp, body)?.finalize().into_bytes();
        Ok(format!("{SIGNATURE_VERSION}={}", encode_hex(digest.as_slice())))
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::Mismatch)?;
        mac.update(SIGNATURE_VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac)
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&text[index..index + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{SignatureError, SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};

    const NOW: i64 = 1_730_000_000;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SecretString::from("8f742231b10e8888abcd99yyyzzz85a5".to_owned()))
    }

    #[test]
    fn signed_request_verifies_within_the_window() {
        let verifier = verifier();
        let body = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&command=%2Fcab";
        let timestamp = "1531420618";
        let signature = verifier.sign(timestamp, body).expect("sign");

        assert!(signature.starts_with("v0="));
        assert_eq!(signature.len(), 3 + 64);
        assert_eq!(verifier.verify(Some(timestamp), Some(&signature), body, 1_531_420_700), Ok(()));
    }

    #[test]
    fn tampered_body_is_a_mismatch() {
        let verifier = verifier();
        let timestamp = NOW.to_string();
        let signature = verifier.sign(&timestamp, b"text=drivers+in+Jaipur").expect("sign");

        assert_eq!(
            verifier.verify(Some(&timestamp), Some(&signature), b"text=drivers+in+Pune", NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_requests_are_rejected() {
        let verifier = verifier();
        let timestamp = (NOW - 301).to_string();
        let signature = verifier.sign(&timestamp, b"{}").expect("sign");

        assert_eq!(
            verifier.verify(Some(&timestamp), Some(&signature), b"{}", NOW),
            Err(SignatureError::Stale { age_secs: 301 })
        );
        assert!(verifier
            .with_tolerance(600)
            .verify(Some(&timestamp), Some(&signature), b"{}", NOW)
            .is_ok());
    }

    #[test]
    fn missing_or_malformed_headers_are_reported() {
        let verifier = verifier();
        let timestamp = NOW.to_string();

        assert_eq!(
            verifier.verify(None, Some("v0=00"), b"{}", NOW),
            Err(SignatureError::MissingHeader(TIMESTAMP_HEADER))
        );
        assert_eq!(
            verifier.verify(Some(&timestamp), None, b"{}", NOW),
            Err(SignatureError::MissingHeader(SIGNATURE_HEADER))
        );
        assert_eq!(
            verifier.verify(Some("yesterday"), Some("v0=00"), b"{}", NOW),
            Err(SignatureError::InvalidTimestamp)
        );
        assert_eq!(
            verifier.verify(Some(&timestamp), Some("v1=abc"), b"{}", NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verifier.verify(Some(&timestamp), Some("v0=zz"), b"{}", NOW),
            Err(SignatureError::Malformed)
        );
    }
}
