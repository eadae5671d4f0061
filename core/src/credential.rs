//! Access-token providers.
//!
//! # Design
//! The executor only needs `token()` and `invalidate()`. `CachedCredential`
//! keeps the current token behind an `RwLock` so readers always see a whole
//! token, old or new, and funnels refreshes through a mutex so only one fetch
//! is in flight. Waiters re-check the cache after taking the mutex and reuse
//! the token the winner stored.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use url::Url;

use crate::config::ClientConfig;
use crate::decode::Decoder;
use crate::descriptor::ReturnType;
use crate::error::ApiError;
use crate::http::{HttpMethod, WireBody, WireRequest};
use crate::transport::Transport;
use crate::types::AccessToken;

/// Supplies the token injected into every request.
pub trait CredentialProvider: Send + Sync {
    /// Current token, refreshing it first if needed.
    fn token(&self) -> Result<String, ApiError>;

    /// Drop the cached token so the next `token()` fetches a new one.
    fn invalidate(&self);
}

/// A fixed token, useful for tests and externally managed credentials.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticCredential {
    fn token(&self) -> Result<String, ApiError> {
        Ok(self.token.clone())
    }

    fn invalidate(&self) {}
}

/// A freshly issued token and its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: Duration,
}

/// Where `CachedCredential` gets new tokens from.
pub trait TokenSource: Send + Sync {
    fn fetch(&self) -> Result<IssuedToken, ApiError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Caching provider with single-flight refresh.
pub struct CachedCredential<S> {
    source: S,
    margin: Duration,
    cache: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl<S: TokenSource> CachedCredential<S> {
    /// `margin` is subtracted from each token's lifetime.
    pub fn new(source: S, margin: Duration) -> Self {
        Self {
            source,
            margin,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    fn cached(&self) -> Option<String> {
        let guard = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|c| Instant::now() < c.refresh_at)
            .map(|c| c.token.clone())
    }
}

impl<S: TokenSource> CredentialProvider for CachedCredential<S> {
    fn token(&self) -> Result<String, ApiError> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }
        let _refreshing = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached() {
            return Ok(token);
        }
        let issued = self.source.fetch()?;
        let lifetime = issued.expires_in.saturating_sub(self.margin);
        info!(expires_in = issued.expires_in.as_secs(), "access token refreshed");
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(CachedToken {
            token: issued.token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(issued.token)
    }

    fn invalidate(&self) {
        debug!("access token invalidated");
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Fetches tokens from the upstream `client_credential` grant.
pub struct AppSecretSource {
    token_url: Url,
    transport: Arc<dyn Transport>,
    decoder: Decoder,
}

impl AppSecretSource {
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, ApiError> {
        let mut token_url = Url::parse(&format!("{}/cgi-bin/token", config.base_url))
            .map_err(|e| ApiError::Credential(format!("invalid token URL: {e}")))?;
        token_url
            .query_pairs_mut()
            .append_pair("grant_type", "client_credential")
            .append_pair("appid", &config.app_id)
            .append_pair("secret", &config.app_secret);
        Ok(Self {
            token_url,
            transport,
            decoder: Decoder::default(),
        })
    }
}

impl TokenSource for AppSecretSource {
    fn fetch(&self) -> Result<IssuedToken, ApiError> {
        let response = self.transport.send(WireRequest {
            method: HttpMethod::Get,
            uri: self.token_url.clone(),
            headers: Vec::new(),
            body: WireBody::Empty,
        })?;
        if !response.is_success() {
            return Err(ApiError::from_response(response));
        }
        let token: AccessToken = self.decoder.decode(response, ReturnType::Json)?.into_json()?;
        Ok(IssuedToken {
            token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }
}
