//! HMAC-signed bearer tokens for the non-JWT principals.
//!
//! Worker portal tokens, client magic links, photo download grants and the
//! break-glass override all share one compact format:
//! `{kind}.{subject}.{org}.{exp}.{sig}` with an HMAC-SHA256 signature over
//! everything before the final dot.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Worker,
    MagicLink,
    PhotoDownload,
    BreakGlass,
}

impl TokenKind {
    fn prefix(&self) -> &'static str {
        match self {
            TokenKind::Worker => "w",
            TokenKind::MagicLink => "c",
            TokenKind::PhotoDownload => "p",
            TokenKind::BreakGlass => "bg",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "w" => Some(TokenKind::Worker),
            "c" => Some(TokenKind::MagicLink),
            "p" => Some(TokenKind::PhotoDownload),
            "bg" => Some(TokenKind::BreakGlass),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub kind: TokenKind,
    pub subject: Uuid,
    pub org_id: Uuid,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
    WrongKind,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "malformed token"),
            TokenError::BadSignature => write!(f, "invalid token signature"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::WrongKind => write!(f, "token kind mismatch"),
        }
    }
}

impl std::error::Error for TokenError {}

fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn mint(
    secret: &str,
    kind: TokenKind,
    subject: Uuid,
    org_id: Uuid,
    ttl_secs: i64,
) -> String {
    let expires_at = Utc::now().timestamp() + ttl_secs;
    let payload = format!("{}.{}.{}.{}", kind.prefix(), subject, org_id, expires_at);
    let sig = sign(secret, &payload);
    format!("{}.{}", payload, sig)
}

pub fn verify(secret: &str, expected_kind: TokenKind, token: &str) -> Result<SignedToken, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 5 {
        return Err(TokenError::Malformed);
    }

    let kind = TokenKind::from_prefix(parts[0]).ok_or(TokenError::Malformed)?;
    let subject = Uuid::parse_str(parts[1]).map_err(|_| TokenError::Malformed)?;
    let org_id = Uuid::parse_str(parts[2]).map_err(|_| TokenError::Malformed)?;
    let expires_at: i64 = parts[3].parse().map_err(|_| TokenError::Malformed)?;

    let payload = format!("{}.{}.{}.{}", parts[0], parts[1], parts[2], parts[3]);
    let expected_sig = sign(secret, &payload);

    let provided = parts[4].as_bytes();
    let expected = expected_sig.as_bytes();
    if provided.len() != expected.len() {
        return Err(TokenError::BadSignature);
    }
    let mut diff = 0u8;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    if diff != 0 {
        return Err(TokenError::BadSignature);
    }

    // Signature first, then kind, then expiry: a forged token never learns
    // which check it failed.
    if kind != expected_kind {
        return Err(TokenError::WrongKind);
    }
    if expires_at < Utc::now().timestamp() {
        return Err(TokenError::Expired);
    }

    Ok(SignedToken {
        kind,
        subject,
        org_id,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn test_mint_and_verify_round_trip() {
        let subject = Uuid::new_v4();
        let org = Uuid::new_v4();
        let token = mint(SECRET, TokenKind::Worker, subject, org, 600);

        let parsed = verify(SECRET, TokenKind::Worker, &token).expect("valid token");
        assert_eq!(parsed.subject, subject);
        assert_eq!(parsed.org_id, org);
        assert_eq!(parsed.kind, TokenKind::Worker);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = mint(SECRET, TokenKind::MagicLink, Uuid::new_v4(), Uuid::new_v4(), 600);
        let err = verify("other-secret", TokenKind::MagicLink, &token).unwrap_err();
        assert_eq!(err, TokenError::BadSignature);
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = mint(SECRET, TokenKind::PhotoDownload, Uuid::new_v4(), Uuid::new_v4(), -1);
        let err = verify(SECRET, TokenKind::PhotoDownload, &token).unwrap_err();
        assert_eq!(err, TokenError::Expired);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let token = mint(SECRET, TokenKind::Worker, Uuid::new_v4(), Uuid::new_v4(), 600);
        let err = verify(SECRET, TokenKind::MagicLink, &token).unwrap_err();
        assert_eq!(err, TokenError::WrongKind);
    }

    #[test]
    fn test_tampered_subject_rejected() {
        let token = mint(SECRET, TokenKind::Worker, Uuid::new_v4(), Uuid::new_v4(), 600);
        let mut parts: Vec<String> = token.split('.').map(|s| s.to_string()).collect();
        parts[1] = Uuid::new_v4().to_string();
        let forged = parts.join(".");
        assert_eq!(
            verify(SECRET, TokenKind::Worker, &forged).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_truncated_token_malformed() {
        assert_eq!(
            verify(SECRET, TokenKind::Worker, "w.only.three").unwrap_err(),
            TokenError::Malformed
        );
    }
}
