//! Bearer token validation.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::discovery::KeyCache;
use crate::auth::policy::AuthPolicy;

/// Authenticated caller attached to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub scopes: Vec<String>,
}

impl Identity {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("no signing key matches kid `{0}`")]
    UnknownKey(String),

    #[error("identity provider metadata unavailable: {0}")]
    Discovery(String),
}

impl AuthError {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::UnknownKey(_) => "unknown_key",
            AuthError::Discovery(_) => "discovery_failed",
        }
    }

    /// The token could not be checked at all, as opposed to being bad.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, AuthError::Discovery(_))
    }
}

/// Verifies a bearer token and yields the caller's identity.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Identity, AuthError>>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    Delimited(String),
    List(Vec<String>),
}

impl ScopeClaim {
    fn into_scopes(self) -> Vec<String> {
        match self {
            ScopeClaim::Delimited(s) => s.split_whitespace().map(str::to_string).collect(),
            ScopeClaim::List(list) => list,
        }
    }
}

/// The claims the gateway reads; everything else is ignored.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
    // OAuth2 `scope` (space delimited) or the `scp` variant some providers use
    #[serde(default)]
    scope: Option<ScopeClaim>,
    #[serde(default)]
    scp: Option<ScopeClaim>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        let mut scopes: Vec<String> = claims
            .scope
            .into_iter()
            .chain(claims.scp)
            .flat_map(ScopeClaim::into_scopes)
            .collect();
        scopes.dedup();
        Identity {
            subject: claims.sub,
            scopes,
        }
    }
}

/// Validates tokens against keys published by the authority.
pub struct JwtValidator {
    keys: Arc<KeyCache>,
    policy: AuthPolicy,
    audience: String,
}

impl JwtValidator {
    pub fn new(keys: Arc<KeyCache>, policy: AuthPolicy, audience: impl Into<String>) -> Self {
        Self {
            keys,
            policy,
            audience: audience.into(),
        }
    }

    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token)?;
        let signing = self.keys.signing_key(header.kid.as_deref()).await?;
        // The key's family must match the header algorithm, so a public key
        // can never be used as an HMAC secret
        let validation = self.policy.validation(header.alg, &signing.issuer, &self.audience);
        let data = decode::<Claims>(token, &signing.key, &validation)?;
        Ok(data.claims.into())
    }
}

impl TokenValidator for JwtValidator {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Identity, AuthError>> {
        self.verify(token).boxed()
    }
}

/// Validates tokens with one fixed key. For tests and local setups.
pub struct StaticKeyValidator {
    key: DecodingKey,
    validation: Validation,
}

impl StaticKeyValidator {
    pub fn hs256(secret: &[u8], policy: AuthPolicy, issuer: &str, audience: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: policy.validation(Algorithm::HS256, issuer, audience),
        }
    }
}

impl TokenValidator for StaticKeyValidator {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Identity, AuthError>> {
        let result = decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims.into())
            .map_err(AuthError::from);
        futures_util::future::ready(result).boxed()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub(crate) const SECRET: &[u8] = b"gateway-test-signing-secret-0123456789abcd";
    pub(crate) const ISSUER: &str = "https://login.example.com/";
    pub(crate) const AUDIENCE: &str = "orders-api";

    pub(crate) fn token(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    pub(crate) fn valid_claims() -> serde_json::Value {
        json!({
            "sub": "user-1",
            "iss": ISSUER,
            "aud": AUDIENCE,
            "exp": chrono::Utc::now().timestamp() + 600,
            "scope": "orders.read orders.write",
        })
    }

    #[tokio::test]
    async fn accepts_valid_token_and_reads_scopes() {
        let validator = StaticKeyValidator::hs256(SECRET, AuthPolicy::Strict, ISSUER, AUDIENCE);
        let identity = validator.validate(&token(valid_claims())).await.unwrap();

        assert_eq!(identity.subject, "user-1");
        assert!(identity.has_scope("orders.write"));
        assert!(!identity.has_scope("admin"));
    }

    #[tokio::test]
    async fn strict_rejects_wrong_audience_permissive_does_not() {
        let mut claims = valid_claims();
        claims["aud"] = json!("someone-else");
        claims["iss"] = json!("https://other-issuer.example/");
        let token = token(claims);

        let strict = StaticKeyValidator::hs256(SECRET, AuthPolicy::Strict, ISSUER, AUDIENCE);
        assert!(matches!(strict.validate(&token).await, Err(AuthError::InvalidToken(_))));

        let permissive = StaticKeyValidator::hs256(SECRET, AuthPolicy::Permissive, ISSUER, AUDIENCE);
        assert!(permissive.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_expired_and_tampered_tokens() {
        let validator = StaticKeyValidator::hs256(SECRET, AuthPolicy::Permissive, ISSUER, AUDIENCE);

        let mut claims = valid_claims();
        claims["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
        assert!(validator.validate(&token(claims)).await.is_err());

        let other = encode(
            &Header::default(),
            &valid_claims(),
            &EncodingKey::from_secret(b"not-the-gateway-secret"),
        )
        .unwrap();
        assert!(validator.validate(&other).await.is_err());
        assert!(validator.validate("not.a.jwt").await.is_err());
    }

    #[test]
    fn scp_list_claim_is_understood() {
        let claims: Claims = serde_json::from_value(json!({
            "sub": "svc",
            "scp": ["orders.read"],
        }))
        .unwrap();
        let identity = Identity::from(claims);
        assert_eq!(identity.scopes, vec!["orders.read"]);
    }
}
