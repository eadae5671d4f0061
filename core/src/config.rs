//! Client configuration.
//!
//! Values come from code through the `with_*` setters or from the
//! environment through `ClientConfig::from_env`.

use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.weixin.qq.com";

/// What to do when a JSON body or form part fails to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationPolicy {
    /// Log a warning, record it on the request and omit the value.
    #[default]
    Degrade,
    /// Abort the call with `ApiError::Serialization`.
    FailFast,
}

impl SerializationPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "degrade" => Some(SerializationPolicy::Degrade),
            "fail-fast" | "fail_fast" | "failfast" => Some(SerializationPolicy::FailFast),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub app_id: String,
    pub app_secret: String,
    pub serialization: SerializationPolicy,
    /// Tokens are refreshed this long before the upstream says they expire.
    pub token_refresh_margin: Duration,
    /// Global transport timeout; `None` leaves the transport default.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            serialization: SerializationPolicy::Degrade,
            token_refresh_margin: Duration::from_secs(300),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self::default().with_base_url(base_url)
    }

    /// Read `WXAPI_*` variables, keeping defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("WXAPI_BASE_URL") {
            config = config.with_base_url(&url);
        }
        if let Ok(id) = env::var("WXAPI_APP_ID") {
            config.app_id = id;
        }
        if let Ok(secret) = env::var("WXAPI_APP_SECRET") {
            config.app_secret = secret;
        }
        if let Some(policy) = env::var("WXAPI_SERIALIZATION")
            .ok()
            .and_then(|v| SerializationPolicy::parse(&v))
        {
            config.serialization = policy;
        }
        if let Some(secs) = env::var("WXAPI_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.timeout = Some(Duration::from_secs(secs));
        }
        config
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_app_credentials(mut self, app_id: &str, app_secret: &str) -> Self {
        self.app_id = app_id.to_string();
        self.app_secret = app_secret.to_string();
        self
    }

    pub fn with_serialization(mut self, policy: SerializationPolicy) -> Self {
        self.serialization = policy;
        self
    }

    pub fn with_token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = margin;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}
