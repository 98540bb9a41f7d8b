//! Token issuer: signed access and refresh tokens.
//!
//! Access and refresh tokens are signed with different secrets and carry
//! different lifetimes, so a token of one kind can never pass validation as
//! the other even if the `typ` claim were forged.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::Principal;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived, stateless, verified by signature and expiry only
    Access,
    /// Long-lived, single-use, tracked by hash on the principal row
    Refresh,
}

/// JWT claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (principal UUID)
    pub sub: String,
    /// Normalized email at issuance time
    pub email: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Random nonce, keeps two tokens issued in the same second distinct
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT claims for refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (principal UUID)
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Random nonce, makes every rotation produce a different token (and hash)
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Default access token lifetime: 15 minutes
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;

/// Default refresh token lifetime: 7 days
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Secrets and lifetimes for both token kinds.
#[derive(Clone)]
pub struct TokenSettings {
    pub access_secret: Vec<u8>,
    pub refresh_secret: Vec<u8>,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish()
    }
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub issued_at: u64,
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

/// A freshly signed refresh token.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub issued_at: u64,
    pub expires_at: u64,
    /// Token duration in seconds, used as the cookie Max-Age
    pub duration: u64,
}

/// Access + refresh token issued together.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: AccessToken,
    pub refresh: RefreshToken,
}

fn now_secs() -> Result<u64, JwtError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| JwtError::TimeError)?
        .as_secs())
}

fn strict_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> JwtError {
    match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::Decoding(e),
    }
}

impl JwtConfig {
    /// Build the issuer. Fails when a secret is missing, both secrets are the
    /// same, or a lifetime is zero. Callers treat this as fatal at startup.
    pub fn new(settings: &TokenSettings) -> Result<Self, JwtError> {
        if settings.access_secret.is_empty() {
            return Err(JwtError::Config("access token secret is empty"));
        }
        if settings.refresh_secret.is_empty() {
            return Err(JwtError::Config("refresh token secret is empty"));
        }
        if settings.access_secret == settings.refresh_secret {
            return Err(JwtError::Config(
                "access and refresh token secrets must differ",
            ));
        }
        if settings.access_ttl_secs == 0 || settings.refresh_ttl_secs == 0 {
            return Err(JwtError::Config("token lifetimes must be non-zero"));
        }

        Ok(Self {
            access_encoding: EncodingKey::from_secret(&settings.access_secret),
            access_decoding: DecodingKey::from_secret(&settings.access_secret),
            refresh_encoding: EncodingKey::from_secret(&settings.refresh_secret),
            refresh_decoding: DecodingKey::from_secret(&settings.refresh_secret),
            access_ttl_secs: settings.access_ttl_secs,
            refresh_ttl_secs: settings.refresh_ttl_secs,
        })
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    /// Issue a new access + refresh pair for a principal.
    pub fn issue(&self, principal: &Principal) -> Result<TokenPair, JwtError> {
        Ok(TokenPair {
            access: self.generate_access_token(&principal.uuid, &principal.email)?,
            refresh: self.generate_refresh_token(&principal.uuid)?,
        })
    }

    /// Generate an access token.
    pub fn generate_access_token(
        &self,
        principal_uuid: &str,
        email: &str,
    ) -> Result<AccessToken, JwtError> {
        let now = now_secs()?;
        let exp = now + self.access_ttl_secs;

        let claims = AccessClaims {
            sub: principal_uuid.to_string(),
            email: email.to_string(),
            token_type: TokenType::Access,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.access_encoding)
            .map_err(JwtError::Encoding)?;

        Ok(AccessToken {
            token,
            issued_at: now,
            expires_at: exp,
            duration: self.access_ttl_secs,
        })
    }

    /// Generate a refresh token.
    pub fn generate_refresh_token(&self, principal_uuid: &str) -> Result<RefreshToken, JwtError> {
        let now = now_secs()?;
        let exp = now + self.refresh_ttl_secs;

        let claims = RefreshClaims {
            sub: principal_uuid.to_string(),
            token_type: TokenType::Refresh,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.refresh_encoding)
            .map_err(JwtError::Encoding)?;

        Ok(RefreshToken {
            token,
            issued_at: now,
            expires_at: exp,
            duration: self.refresh_ttl_secs,
        })
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.access_decoding, &strict_validation())
                .map_err(map_decode_error)?;

        if token_data.claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }

    /// Validate and decode a refresh token.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let token_data = jsonwebtoken::decode::<RefreshClaims>(
            token,
            &self.refresh_decoding,
            &strict_validation(),
        )
        .map_err(map_decode_error)?;

        if token_data.claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Missing or unusable issuer configuration
    Config(&'static str),
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Error decoding the token (bad signature, malformed, ...)
    Decoding(jsonwebtoken::errors::Error),
    /// Signature valid but `exp` has passed
    Expired,
    /// System time error
    TimeError,
    /// Wrong token type (e.g., using refresh token as access token)
    WrongTokenType,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Config(msg) => write!(f, "Invalid token configuration: {}", msg),
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Decoding(e) => write!(f, "Failed to decode token: {}", e),
            JwtError::Expired => write!(f, "Token expired"),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
        }
    }
}

impl std::error::Error for JwtError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TokenSettings {
        TokenSettings {
            access_secret: b"test-access-secret".to_vec(),
            refresh_secret: b"test-refresh-secret".to_vec(),
            access_ttl_secs: 60,
            refresh_ttl_secs: 3600,
        }
    }

    fn principal() -> Principal {
        Principal {
            id: 1,
            uuid: "uuid-123".to_string(),
            email: "a@x.com".to_string(),
            display_name: None,
            password_hash: None,
            external_provider: None,
            external_subject: None,
        }
    }

    #[test]
    fn test_issue_pair() {
        let config = JwtConfig::new(&settings()).unwrap();
        let pair = config.issue(&principal()).unwrap();

        assert_eq!(pair.access.duration, 60);
        assert_eq!(pair.refresh.duration, 3600);
        assert_eq!(pair.access.expires_at, pair.access.issued_at + 60);

        let claims = config.validate_access_token(&pair.access.token).unwrap();
        assert_eq!(claims.sub, "uuid-123");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.token_type, TokenType::Access);

        let claims = config.validate_refresh_token(&pair.refresh.token).unwrap();
        assert_eq!(claims.sub, "uuid-123");
        assert_eq!(claims.token_type, TokenType::Refresh);
    }

    #[test]
    fn test_consecutive_pairs_differ() {
        let config = JwtConfig::new(&settings()).unwrap();
        let a = config.issue(&principal()).unwrap();
        let b = config.issue(&principal()).unwrap();

        assert_ne!(a.access.token, b.access.token);
        assert_ne!(a.refresh.token, b.refresh.token);
    }

    #[test]
    fn test_kinds_are_not_interchangeable() {
        let config = JwtConfig::new(&settings()).unwrap();
        let pair = config.issue(&principal()).unwrap();

        assert!(config.validate_refresh_token(&pair.access.token).is_err());
        assert!(config.validate_access_token(&pair.refresh.token).is_err());
    }

    #[test]
    fn test_missing_configuration_is_rejected() {
        let mut s = settings();
        s.access_secret.clear();
        assert!(matches!(JwtConfig::new(&s), Err(JwtError::Config(_))));

        let mut s = settings();
        s.refresh_secret = s.access_secret.clone();
        assert!(matches!(JwtConfig::new(&s), Err(JwtError::Config(_))));

        let mut s = settings();
        s.access_ttl_secs = 0;
        assert!(matches!(JwtConfig::new(&s), Err(JwtError::Config(_))));
    }

    #[test]
    fn test_invalid_token() {
        let config = JwtConfig::new(&settings()).unwrap();
        assert!(matches!(
            config.validate_access_token("invalid-token"),
            Err(JwtError::Decoding(_))
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let config1 = JwtConfig::new(&settings()).unwrap();
        let mut other = settings();
        other.access_secret = b"another-access-secret".to_vec();
        let config2 = JwtConfig::new(&other).unwrap();

        let pair = config1.issue(&principal()).unwrap();
        assert!(config2.validate_access_token(&pair.access.token).is_err());
    }

    #[test]
    fn test_expired_token_reports_expired() {
        let s = settings();
        let encoding_key = EncodingKey::from_secret(&s.access_secret);
        let now = now_secs().unwrap();

        let claims = AccessClaims {
            sub: "uuid-123".to_string(),
            email: "a@x.com".to_string(),
            token_type: TokenType::Access,
            jti: "jti".to_string(),
            iat: now - 100,
            exp: now - 50,
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &encoding_key).unwrap();

        let config = JwtConfig::new(&s).unwrap();
        assert!(matches!(
            config.validate_access_token(&token),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn test_accepted_until_expiry() {
        let mut s = settings();
        s.access_ttl_secs = 1;
        let config = JwtConfig::new(&s).unwrap();
        let pair = config.issue(&principal()).unwrap();

        assert!(config.validate_access_token(&pair.access.token).is_ok());
        std::thread::sleep(std::time::Duration::from_millis(2100));
        assert!(matches!(
            config.validate_access_token(&pair.access.token),
            Err(JwtError::Expired)
        ));
    }
}
