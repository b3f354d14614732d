//! Caller identity resolution.
//!
//! Identities are opaque strings. Certificate callers are identified by the
//! SHA-256 fingerprint of their DER certificate, rendered as 32
//! colon-separated uppercase hex pairs (`AE:72:90:...:6F`), which is how the
//! ledger stores user identities. Token callers are identified by the
//! token's subject claim.
//!
//! Token signatures are validated by the platform before a request reaches
//! the core; [`IdentityResolver`] only checks issuer, audience, and tenant
//! claims against the configured [`TokenExpectations`].

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AclError, AclResult};

/// Number of bytes in a certificate fingerprint.
pub const FINGERPRINT_LEN: usize = 32;

/// A stable caller identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Wraps an already-derived identity string. Empty strings are rejected.
    pub fn new(id: impl Into<String>) -> AclResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(AclError::MalformedInput("identity is empty".into()));
        }
        Ok(Self(id))
    }

    /// Canonical fingerprint of a DER-encoded certificate.
    pub fn from_certificate_der(der: &[u8]) -> Self {
        Self(format_fingerprint_bytes(&Sha256::digest(der)))
    }

    /// Canonical fingerprint of the first `CERTIFICATE` block in `pem`.
    pub fn from_certificate_pem(pem: &str) -> AclResult<Self> {
        Ok(Self::from_certificate_der(&pem_certificate_der(pem)?))
    }

    /// Canonicalizes a hex fingerprint (any case, with or without colons).
    pub fn from_fingerprint_hex(hex_fp: &str) -> AclResult<Self> {
        format_fingerprint(hex_fp).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = AclError;

    fn try_from(value: String) -> AclResult<Self> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

/// Formats a hex fingerprint as `XX:XX:...:XX` uppercase.
pub fn format_fingerprint(hex_fp: &str) -> AclResult<String> {
    let compact: String = hex_fp.trim().chars().filter(|c| *c != ':').collect();
    let bytes = hex::decode(&compact)
        .map_err(|e| AclError::MalformedInput(format!("fingerprint is not hex: {e}")))?;
    if bytes.len() != FINGERPRINT_LEN {
        return Err(AclError::MalformedInput(format!(
            "fingerprint must be {FINGERPRINT_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(format_fingerprint_bytes(&bytes))
}

fn format_fingerprint_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn pem_certificate_der(pem: &str) -> AclResult<Vec<u8>> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let Some(begin) = pem.find(BEGIN) else {
        return Err(AclError::MalformedInput("no PEM certificate block".into()));
    };
    let start = begin + BEGIN.len();
    let len = pem[start..]
        .find(END)
        .ok_or_else(|| AclError::MalformedInput("unterminated PEM certificate block".into()))?;
    let body: String = pem[start..start + len]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let der = STANDARD
        .decode(body)
        .map_err(|e| AclError::MalformedInput(format!("PEM body is not base64: {e}")))?;
    if der.is_empty() {
        return Err(AclError::MalformedInput("empty PEM certificate".into()));
    }
    Ok(der)
}

/// Claims extracted from a platform-validated bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub oid: Option<String>,
}

impl TokenClaims {
    /// Subject claim, falling back to the object id claim.
    pub fn subject(&self) -> Option<&str> {
        self.sub
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.oid.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Issuer, audience, and tenant a token must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExpectations {
    pub issuer: String,
    pub audience: String,
    pub tenant_id: String,
}

impl TokenExpectations {
    /// Returns the first claim that does not match, if any.
    pub fn mismatch(&self, claims: &TokenClaims) -> Option<&'static str> {
        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Some("iss");
        }
        if claims.aud.as_deref() != Some(self.audience.as_str()) {
            return Some("aud");
        }
        if claims.tid.as_deref() != Some(self.tenant_id.as_str()) {
            return Some("tid");
        }
        None
    }
}

/// Which credentials an endpoint requires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// Client certificate only.
    #[default]
    Certificate,
    /// Bearer token only.
    Token,
    /// Certificate if presented, otherwise a token.
    CertificateOrToken,
    /// Both a certificate and a token; the certificate names the caller.
    AllOf,
}

/// Credentials the platform attached to an inbound request.
#[derive(Debug, Clone, Default)]
pub struct CallerCredentials {
    pub certificate_pem: Option<String>,
    pub token: Option<TokenClaims>,
}

impl CallerCredentials {
    pub fn certificate(pem: impl Into<String>) -> Self {
        Self {
            certificate_pem: Some(pem.into()),
            token: None,
        }
    }

    pub fn token(claims: TokenClaims) -> Self {
        Self {
            certificate_pem: None,
            token: Some(claims),
        }
    }
}

/// Turns request credentials into an [`Identity`].
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    scheme: AuthScheme,
    expectations: Option<TokenExpectations>,
}

impl IdentityResolver {
    pub fn new(scheme: AuthScheme, expectations: Option<TokenExpectations>) -> Self {
        Self {
            scheme,
            expectations,
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn resolve(&self, creds: &CallerCredentials) -> AclResult<Identity> {
        let identity = match self.scheme {
            AuthScheme::Certificate => self.certificate_identity(creds)?,
            AuthScheme::Token => self.token_identity(creds)?,
            AuthScheme::CertificateOrToken => {
                if creds.certificate_pem.is_some() {
                    self.certificate_identity(creds)?
                } else {
                    self.token_identity(creds)?
                }
            }
            AuthScheme::AllOf => {
                let id = self.certificate_identity(creds)?;
                self.checked_claims(creds)?;
                id
            }
        };
        tracing::debug!(caller = %identity, scheme = ?self.scheme, "resolved caller identity");
        Ok(identity)
    }

    fn certificate_identity(&self, creds: &CallerCredentials) -> AclResult<Identity> {
        let pem = creds
            .certificate_pem
            .as_deref()
            .ok_or_else(|| AclError::Unauthenticated("client certificate is required".into()))?;
        Identity::from_certificate_pem(pem)
            .map_err(|e| AclError::Unauthenticated(format!("unusable client certificate: {e}")))
    }

    fn token_identity(&self, creds: &CallerCredentials) -> AclResult<Identity> {
        let claims = self.checked_claims(creds)?;
        let subject = claims
            .subject()
            .ok_or_else(|| AclError::Unauthenticated("token has no subject claim".into()))?;
        Identity::new(subject)
    }

    fn checked_claims<'a>(&self, creds: &'a CallerCredentials) -> AclResult<&'a TokenClaims> {
        let claims = creds
            .token
            .as_ref()
            .ok_or_else(|| AclError::Unauthenticated("bearer token is required".into()))?;
        if let Some(expected) = &self.expectations {
            if let Some(claim) = expected.mismatch(claims) {
                tracing::warn!(claim, "token claim did not match expected value");
                return Err(AclError::Unauthenticated(format!(
                    "token claim `{claim}` did not match"
                )));
            }
        }
        Ok(claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FP_HEX: &str = "ae7290e5dc391ad8947d978405eb3fc003161803a831850f04cf6dc4c989f56f";
    const FP: &str = "AE:72:90:E5:DC:39:1A:D8:94:7D:97:84:05:EB:3F:C0:03:16:18:03:A8:31:85:0F:04:CF:6D:C4:C9:89:F5:6F";

    fn pem_for(der: &[u8]) -> String {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            STANDARD.encode(der)
        )
    }

    fn expectations() -> TokenExpectations {
        TokenExpectations {
            issuer: "https://login.example.com/t/v2.0".into(),
            audience: "app".into(),
            tenant_id: "t".into(),
        }
    }

    fn good_claims() -> TokenClaims {
        TokenClaims {
            iss: Some("https://login.example.com/t/v2.0".into()),
            aud: Some("app".into()),
            tid: Some("t".into()),
            sub: Some("user-42".into()),
            oid: None,
        }
    }

    #[test]
    fn formats_lowercase_hex() {
        assert_eq!(format_fingerprint(FP_HEX).unwrap(), FP);
    }

    #[test]
    fn formatting_is_idempotent() {
        assert_eq!(format_fingerprint(FP).unwrap(), FP);
    }

    #[test]
    fn rejects_short_and_non_hex_fingerprints() {
        assert!(format_fingerprint("abcd").is_err());
        assert!(format_fingerprint(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn fingerprint_has_expected_shape() {
        let id = Identity::from_certificate_der(b"certificate bytes");
        let parts: Vec<&str> = id.as_str().split(':').collect();
        assert_eq!(parts.len(), FINGERPRINT_LEN);
        for part in parts {
            assert_eq!(part.len(), 2);
            assert_eq!(part, part.to_ascii_uppercase());
            assert!(u8::from_str_radix(part, 16).is_ok());
        }
    }

    #[test]
    fn pem_and_der_agree() {
        let der = b"\x30\x82\x01\x0a fake der";
        let from_pem = Identity::from_certificate_pem(&pem_for(der)).unwrap();
        assert_eq!(from_pem, Identity::from_certificate_der(der));
    }

    #[test]
    fn pem_without_block_is_malformed() {
        let err = Identity::from_certificate_pem("hello").unwrap_err();
        assert!(matches!(err, AclError::MalformedInput(_)));
    }

    #[test]
    fn empty_identity_rejected() {
        assert!(Identity::new("").is_err());
        assert!(serde_json::from_str::<Identity>("\"\"").is_err());
        let id: Identity = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn certificate_scheme_requires_certificate() {
        let resolver = IdentityResolver::default();
        let err = resolver
            .resolve(&CallerCredentials::token(good_claims()))
            .unwrap_err();
        assert!(matches!(err, AclError::Unauthenticated(_)));

        let der = b"der";
        let id = resolver
            .resolve(&CallerCredentials::certificate(pem_for(der)))
            .unwrap();
        assert_eq!(id, Identity::from_certificate_der(der));
    }

    #[test]
    fn token_scheme_uses_subject_and_checks_claims() {
        let resolver = IdentityResolver::new(AuthScheme::Token, Some(expectations()));
        let id = resolver
            .resolve(&CallerCredentials::token(good_claims()))
            .unwrap();
        assert_eq!(id.as_str(), "user-42");

        let mut wrong_aud = good_claims();
        wrong_aud.aud = Some("other".into());
        let err = resolver
            .resolve(&CallerCredentials::token(wrong_aud))
            .unwrap_err();
        assert_eq!(
            err,
            AclError::Unauthenticated("token claim `aud` did not match".into())
        );
    }

    #[test]
    fn subject_falls_back_to_oid() {
        let claims = TokenClaims {
            oid: Some("object-1".into()),
            ..TokenClaims::default()
        };
        assert_eq!(claims.subject(), Some("object-1"));
        assert_eq!(TokenClaims::default().subject(), None);
    }

    #[test]
    fn certificate_or_token_prefers_certificate() {
        let resolver = IdentityResolver::new(AuthScheme::CertificateOrToken, None);
        let creds = CallerCredentials {
            certificate_pem: Some(pem_for(b"der")),
            token: Some(good_claims()),
        };
        assert_eq!(
            resolver.resolve(&creds).unwrap(),
            Identity::from_certificate_der(b"der")
        );
        let id = resolver
            .resolve(&CallerCredentials::token(good_claims()))
            .unwrap();
        assert_eq!(id.as_str(), "user-42");
    }

    #[test]
    fn all_of_requires_both() {
        let resolver = IdentityResolver::new(AuthScheme::AllOf, Some(expectations()));
        assert!(resolver
            .resolve(&CallerCredentials::certificate(pem_for(b"der")))
            .is_err());
        assert!(resolver
            .resolve(&CallerCredentials::token(good_claims()))
            .is_err());

        let creds = CallerCredentials {
            certificate_pem: Some(pem_for(b"der")),
            token: Some(good_claims()),
        };
        assert_eq!(
            resolver.resolve(&creds).unwrap(),
            Identity::from_certificate_der(b"der")
        );
    }
}
