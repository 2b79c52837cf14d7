//! Authentication Module
//!
//! Bearer-token (JWT) verification for the CareBridge API. Reads are open;
//! every mutating request must carry `Authorization: Bearer <token>` signed
//! with the deployment secret. Token issuance belongs to the hospital's
//! identity provider; `generate_jwt_token` exists for operators and tests.

use crate::error::{ApiError, ApiResult};
use carebridge_core::{CareError, ConfigError};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

/// Role allowed to run administrative operations such as backfill.
pub const ADMIN_ROLE: &str = "admin";

// ============================================================================
// CLOCK ABSTRACTION
// ============================================================================

/// Clock used for token time checks.
///
/// `jsonwebtoken`'s own expiry check reads the system clock directly; owning
/// the check lets tests pin time.
pub trait JwtClock: Send + Sync {
    /// Current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl JwtClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl JwtClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

// ============================================================================
// JWT SECRET (TYPE-SAFE)
// ============================================================================

/// JWT signing secret that never shows up in logs.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Wrap a secret, rejecting the empty string.
    pub fn new(secret: String) -> Result<Self, CareError> {
        if secret.is_empty() {
            return Err(CareError::Config(ConfigError::MissingRequired {
                field: "jwt_secret".to_string(),
            }));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    /// Expose the secret value (only for cryptographic operations).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

fn build_jwt_secret(secret_str: String) -> JwtSecret {
    let normalized = if secret_str.trim().is_empty() {
        INSECURE_DEFAULT_SECRET.to_string()
    } else {
        secret_str
    };

    match JwtSecret::new(normalized) {
        Ok(secret) => secret,
        Err(_) => JwtSecret(SecretString::new(INSECURE_DEFAULT_SECRET.to_string().into())),
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration, resolved once at startup.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret used to verify (and, for operators, sign) tokens
    pub jwt_secret: JwtSecret,

    /// JWT algorithm (default: HS256)
    pub jwt_algorithm: Algorithm,

    /// Lifetime of tokens produced by `generate_jwt_token`, in seconds
    pub jwt_expiration_secs: i64,

    /// Clock skew tolerance in seconds (default: 60)
    pub jwt_clock_skew_secs: i64,

    /// Clock for token time validation
    pub clock: Arc<dyn JwtClock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_expiration_secs", &self.jwt_expiration_secs)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .field("clock", &"<JwtClock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: build_jwt_secret(String::new()),
            jwt_algorithm: Algorithm::HS256,
            jwt_expiration_secs: 3600,
            jwt_clock_skew_secs: 60,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `CAREBRIDGE_JWT_SECRET`: JWT signing secret
    /// - `CAREBRIDGE_JWT_EXPIRATION_SECS`: token lifetime (default: 3600)
    /// - `CAREBRIDGE_JWT_CLOCK_SKEW_SECS`: clock skew tolerance (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secret_str = std::env::var("CAREBRIDGE_JWT_SECRET").unwrap_or_default();

        Self {
            jwt_secret: build_jwt_secret(secret_str),
            jwt_expiration_secs: std::env::var("CAREBRIDGE_JWT_EXPIRATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jwt_expiration_secs),
            jwt_clock_skew_secs: std::env::var("CAREBRIDGE_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jwt_clock_skew_secs),
            ..defaults
        }
    }

    /// Config with an explicit secret and clock.
    pub fn with_secret(secret: &str, clock: Arc<dyn JwtClock>) -> ApiResult<Self> {
        let jwt_secret = JwtSecret::new(secret.to_string())?;
        Ok(Self {
            jwt_secret,
            clock,
            ..Self::default()
        })
    }

    /// Refuse insecure secrets when `CAREBRIDGE_ENVIRONMENT` is production.
    ///
    /// Outside production the server starts with a warning.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let environment = std::env::var("CAREBRIDGE_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();
        let is_production = environment == "production" || environment == "prod";

        let problem = if self.jwt_secret.is_insecure_default() {
            Some("JWT secret is the insecure default")
        } else if self.jwt_secret.len() < 32 {
            Some("JWT secret is shorter than 32 characters")
        } else {
            None
        };

        match problem {
            Some(problem) if is_production => Err(ApiError::invalid_input(format!(
                "Cannot start in production: {}. Set CAREBRIDGE_JWT_SECRET.",
                problem
            ))),
            Some(problem) => {
                tracing::warn!(environment = %environment, "{}; acceptable only for local development", problem);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

// ============================================================================
// JWT CLAIMS
// ============================================================================

/// JWT claims accepted by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (staff or service account id)
    pub sub: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    pub fn new(subject: String, expiration_secs: i64, clock: &dyn JwtClock) -> Self {
        let now = clock.now_epoch_secs();
        Self {
            sub: subject,
            iat: now,
            exp: now + expiration_secs,
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles.extend(roles);
        self
    }
}

// ============================================================================
// AUTHENTICATION CONTEXT
// ============================================================================

/// Caller identity injected into request extensions after verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub subject: String,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Fail with 403 unless the caller holds `role`.
    pub fn require_role(&self, role: &str) -> ApiResult<()> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!("Role '{}' required", role)))
        }
    }
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            roles: claims.roles,
        }
    }
}

// ============================================================================
// AUTHENTICATION FUNCTIONS
// ============================================================================

fn validate_claim_times(now: i64, exp: i64, leeway_secs: i64) -> ApiResult<()> {
    if exp < now - leeway_secs {
        return Err(ApiError::token_expired());
    }
    Ok(())
}

/// Verify a token's signature and expiry and return its claims.
///
/// Signature checking is delegated to `jsonwebtoken`; expiry is checked
/// against the configured clock with skew tolerance.
pub fn validate_jwt_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

    let token_data =
        decode::<Claims>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::invalid_token("Token signature is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidToken => {
                ApiError::invalid_token("Token is invalid")
            }
            _ => ApiError::invalid_token(format!("Token validation failed: {}", e)),
        })?;

    let claims = token_data.claims;
    let now = config.clock.now_epoch_secs();
    if now < 0 {
        tracing::error!(timestamp = now, "System clock returned pre-epoch time");
        return Err(ApiError::internal_error("Server time configuration error"));
    }

    validate_claim_times(now, claims.exp, config.jwt_clock_skew_secs)?;
    Ok(claims)
}

/// Sign a token for `subject` with the given roles.
pub fn generate_jwt_token(
    config: &AuthConfig,
    subject: String,
    roles: Vec<String>,
) -> ApiResult<String> {
    let claims =
        Claims::new(subject, config.jwt_expiration_secs, &*config.clock).with_roles(roles);

    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    let header = Header::new(config.jwt_algorithm);

    encode(&header, &claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

/// Authenticate from the raw `Authorization` header value.
pub fn authenticate(config: &AuthConfig, auth_header: Option<&str>) -> ApiResult<AuthContext> {
    let Some(auth_value) = auth_header else {
        return Err(ApiError::unauthorized(
            "Authentication required: provide an Authorization header",
        ));
    };

    let token = auth_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::invalid_token("Authorization header must use Bearer scheme"))?;

    validate_jwt_token(config, token).map(AuthContext::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    /// 2024-01-01 00:00:00 UTC
    const NOW: i64 = 1_704_067_200;

    fn config_at(now: i64) -> ApiResult<AuthConfig> {
        AuthConfig::with_secret(
            "test-secret-that-is-at-least-32-characters",
            Arc::new(FixedClock(now)),
        )
    }

    #[test]
    fn test_secret_debug_is_redacted() -> ApiResult<()> {
        let config = config_at(NOW)?;
        let debug = format!("{:?}", config);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("test-secret"));
        Ok(())
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(JwtSecret::new(String::new()).is_err());
    }

    #[test]
    fn test_blank_env_secret_falls_back_to_default() {
        assert!(build_jwt_secret("   ".to_string()).is_insecure_default());
    }

    #[test]
    fn test_round_trip_token() -> ApiResult<()> {
        let config = config_at(NOW)?;
        let token = generate_jwt_token(&config, "nurse-17".to_string(), vec!["clinical".to_string()])?;
        let claims = validate_jwt_token(&config, &token)?;
        assert_eq!(claims.sub, "nurse-17");
        assert_eq!(claims.exp, NOW + 3600);
        assert_eq!(claims.roles, vec!["clinical".to_string()]);
        Ok(())
    }

    #[test]
    fn test_expired_token_rejected() -> ApiResult<()> {
        let issuer = config_at(NOW)?;
        let token = generate_jwt_token(&issuer, "nurse-17".to_string(), vec![])?;

        let later = config_at(NOW + 3600 + 61)?;
        let err = validate_jwt_token(&later, &token).err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::TokenExpired));

        let within_skew = config_at(NOW + 3600 + 30)?;
        assert!(validate_jwt_token(&within_skew, &token).is_ok());
        Ok(())
    }

    #[test]
    fn test_wrong_secret_rejected() -> ApiResult<()> {
        let issuer = config_at(NOW)?;
        let token = generate_jwt_token(&issuer, "nurse-17".to_string(), vec![])?;

        let other = AuthConfig::with_secret(
            "a-completely-different-secret-of-32-chars",
            Arc::new(FixedClock(NOW)),
        )?;
        let err = validate_jwt_token(&other, &token).err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::InvalidToken));
        Ok(())
    }

    #[test]
    fn test_authenticate_header_forms() -> ApiResult<()> {
        let config = config_at(NOW)?;
        let token = generate_jwt_token(&config, "svc-billing".to_string(), vec![ADMIN_ROLE.to_string()])?;

        let ctx = authenticate(&config, Some(&format!("Bearer {}", token)))?;
        assert_eq!(ctx.subject, "svc-billing");
        assert!(ctx.require_role(ADMIN_ROLE).is_ok());

        let missing = authenticate(&config, None).err();
        assert_eq!(missing.map(|e| e.code), Some(ErrorCode::Unauthorized));

        let basic = authenticate(&config, Some("Basic dXNlcjpwYXNz")).err();
        assert_eq!(basic.map(|e| e.code), Some(ErrorCode::InvalidToken));
        Ok(())
    }

    #[test]
    fn test_require_role_forbidden() {
        let ctx = AuthContext {
            subject: "clerk".to_string(),
            roles: vec!["clinical".to_string()],
        };
        let err = ctx.require_role(ADMIN_ROLE).err();
        assert_eq!(err.map(|e| e.code), Some(ErrorCode::Forbidden));
    }
}
