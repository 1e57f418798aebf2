//! OpenID discovery and signing-key cache.
//!
//! # Data Flow
//! ```text
//! {authority}/.well-known/openid-configuration
//!     → issuer, jwks_uri
//!     → JWKS document
//!     → cached set (ArcSwap), read lock-free per request
//! Unknown kid → refetch (rate limited) → retry lookup
//! Failed fetch → no further attempt for MIN_REFRESH_INTERVAL
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::auth::token::AuthError;

const METADATA_PATH: &str = ".well-known/openid-configuration";
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct OpenIdMetadata {
    issuer: String,
    jwks_uri: String,
}

struct KeySet {
    issuer: String,
    jwks: JwkSet,
    fetched_at: Instant,
}

/// A key resolved for one token.
pub struct SigningKey {
    pub key: DecodingKey,
    pub issuer: String,
}

/// Signing keys of one authority.
pub struct KeyCache {
    http: reqwest::Client,
    metadata_url: Url,
    require_https: bool,
    current: ArcSwapOption<KeySet>,
    last_failure: ArcSwapOption<Instant>,
    refresh: Mutex<()>,
}

impl KeyCache {
    pub fn new(authority: &str, require_https: bool) -> Result<Self, AuthError> {
        let mut base = Url::parse(authority).map_err(|e| AuthError::Discovery(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let metadata_url = base
            .join(METADATA_PATH)
            .map_err(|e| AuthError::Discovery(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        Ok(Self {
            http,
            metadata_url,
            require_https,
            current: ArcSwapOption::empty(),
            last_failure: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        })
    }

    pub fn metadata_url(&self) -> &Url {
        &self.metadata_url
    }

    fn check_scheme(&self, url: &Url) -> Result<(), AuthError> {
        if self.require_https && url.scheme() != "https" {
            return Err(AuthError::Discovery(format!("refusing non-https metadata url `{url}`")));
        }
        Ok(())
    }

    async fn fetch(&self) -> Result<Arc<KeySet>, AuthError> {
        self.check_scheme(&self.metadata_url)?;
        let metadata: OpenIdMetadata = self
            .http
            .get(self.metadata_url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Discovery(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        let jwks_uri = Url::parse(&metadata.jwks_uri).map_err(|e| AuthError::Discovery(e.to_string()))?;
        self.check_scheme(&jwks_uri)?;
        let jwks: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Discovery(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        tracing::info!(issuer = %metadata.issuer, keys = jwks.keys.len(), "Signing keys refreshed");
        let set = Arc::new(KeySet {
            issuer: metadata.issuer,
            jwks,
            fetched_at: Instant::now(),
        });
        self.current.store(Some(set.clone()));
        Ok(set)
    }

    fn backing_off(&self) -> bool {
        let last = self.last_failure.load();
        matches!(&*last, Some(at) if at.elapsed() < MIN_REFRESH_INTERVAL)
    }

    /// Refetch unless someone else just did, or the last attempt failed
    /// less than `MIN_REFRESH_INTERVAL` ago.
    async fn refresh(&self, kid: Option<&str>) -> Result<Arc<KeySet>, AuthError> {
        if self.current.load().is_none() && self.backing_off() {
            return Err(provider_unavailable());
        }

        let _guard = self.refresh.lock().await;
        let current = self.current.load_full();
        if let Some(set) = &current {
            if lookup(set, kid).is_some() || set.fetched_at.elapsed() < MIN_REFRESH_INTERVAL {
                return Ok(set.clone());
            }
        }
        if self.backing_off() {
            return current.ok_or_else(provider_unavailable);
        }

        match self.fetch().await {
            Ok(set) => {
                self.last_failure.store(None);
                Ok(set)
            }
            Err(e) => {
                tracing::warn!(metadata = %self.metadata_url, error = %e, "Signing key refresh failed");
                self.last_failure.store(Some(Arc::new(Instant::now())));
                Err(e)
            }
        }
    }

    /// Find the key for a token's `kid`, refreshing once if it is unknown.
    pub async fn signing_key(&self, kid: Option<&str>) -> Result<SigningKey, AuthError> {
        let set = match self.current.load_full() {
            Some(set) if lookup(&set, kid).is_some() => set,
            _ => self.refresh(kid).await?,
        };
        let jwk = lookup(&set, kid).ok_or_else(|| AuthError::UnknownKey(kid.unwrap_or("<none>").to_string()))?;
        Ok(SigningKey {
            key: DecodingKey::from_jwk(jwk)?,
            issuer: set.issuer.clone(),
        })
    }
}

fn provider_unavailable() -> AuthError {
    AuthError::Discovery(format!(
        "identity provider unavailable, next attempt within {}s",
        MIN_REFRESH_INTERVAL.as_secs()
    ))
}

/// Without a `kid` only a single-key set is unambiguous.
fn lookup<'a>(set: &'a KeySet, kid: Option<&str>) -> Option<&'a jsonwebtoken::jwk::Jwk> {
    match kid {
        Some(kid) => set.jwks.find(kid),
        None if set.jwks.keys.len() == 1 => set.jwks.keys.first(),
        None => None,
    }
}
