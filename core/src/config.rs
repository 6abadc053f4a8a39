//! Session configurations and service-wide settings.
//!
//! # Design
//! `Configuration` is the key the session pool reuses sessions by. The
//! foreground, ephemeral and background variants compare structurally;
//! `Custom` compares by the identity of its settings object, so two custom
//! configurations built from equal-looking settings still get separate
//! sessions unless they share the same `CustomSettings`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ServiceError;

/// Background identifier used when none is given.
pub const DEFAULT_BACKGROUND_ID: &str = "courier.service.background";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    UseProtocolCachePolicy,
    ReloadIgnoringLocalCacheData,
    ReturnCacheDataElseLoad,
    ReturnCacheDataDontLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieAcceptPolicy {
    Always,
    Never,
    OnlyFromMainDocumentDomain,
}

/// Policy bundle a transport applies to every task of a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub allows_cellular_access: bool,
    /// How long to wait for additional data before timing out.
    #[serde(deserialize_with = "secs::deserialize")]
    pub timeout_for_request: Duration,
    /// Upper bound for a whole resource transfer.
    #[serde(deserialize_with = "secs::deserialize")]
    pub timeout_for_resource: Duration,
    pub max_connections_per_host: usize,
    pub cache_policy: CachePolicy,
    pub should_set_cookies: bool,
    pub cookie_accept_policy: CookieAcceptPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            allows_cellular_access: true,
            timeout_for_request: Duration::from_secs(60),
            timeout_for_resource: Duration::from_secs(7 * 24 * 60 * 60),
            max_connections_per_host: 4,
            cache_policy: CachePolicy::UseProtocolCachePolicy,
            should_set_cookies: true,
            cookie_accept_policy: CookieAcceptPolicy::OnlyFromMainDocumentDomain,
        }
    }
}

impl SessionSettings {
    /// No persistent cookies or cache.
    pub fn ephemeral() -> Self {
        Self {
            cache_policy: CachePolicy::ReloadIgnoringLocalCacheData,
            should_set_cookies: false,
            cookie_accept_policy: CookieAcceptPolicy::Never,
            ..Self::default()
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        f64::deserialize(deserializer).and_then(|secs| {
            Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
        })
    }
}

/// Settings object for `Configuration::Custom`, compared by identity.
#[derive(Clone)]
pub struct CustomSettings(Arc<SessionSettings>);

impl CustomSettings {
    pub fn new(settings: SessionSettings) -> Self {
        Self(Arc::new(settings))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.0
    }
}

impl PartialEq for CustomSettings {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CustomSettings {}

impl Hash for CustomSettings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for CustomSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomSettings({:p})", Arc::as_ptr(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Configuration {
    Foreground,
    Ephemeral,
    Background(String),
    Custom(CustomSettings),
}

impl Configuration {
    pub fn background() -> Self {
        Configuration::Background(DEFAULT_BACKGROUND_ID.to_string())
    }

    pub fn custom(settings: SessionSettings) -> Self {
        Configuration::Custom(CustomSettings::new(settings))
    }

    /// Effective policy bundle for this configuration.
    pub fn settings(&self) -> SessionSettings {
        match self {
            Configuration::Foreground | Configuration::Background(_) => SessionSettings::default(),
            Configuration::Ephemeral => SessionSettings::ephemeral(),
            Configuration::Custom(custom) => custom.settings().clone(),
        }
    }

    pub fn background_identifier(&self) -> Option<&str> {
        match self {
            Configuration::Background(id) => Some(id),
            _ => None,
        }
    }

    /// Reject configurations no session can be built from.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if let Configuration::Background(id) = self {
            if id.trim().is_empty() {
                return Err(ServiceError::Configuration(
                    "background identifier must not be empty".to_string(),
                ));
            }
        }
        let settings = self.settings();
        if settings.timeout_for_request.is_zero() || settings.timeout_for_resource.is_zero() {
            return Err(ServiceError::Configuration("timeouts must be non-zero".to_string()));
        }
        if settings.max_connections_per_host == 0 {
            return Err(ServiceError::Configuration(
                "max_connections_per_host must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which configuration a submission falls back to when the caller passes
/// none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationKind {
    Foreground,
    Ephemeral,
    Background,
}

/// Service-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Identifier used for the default background configuration.
    pub background_identifier: String,
    /// Default for data requests.
    pub data_configuration: ConfigurationKind,
    /// Default for uploads and downloads.
    pub transfer_configuration: ConfigurationKind,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            background_identifier: DEFAULT_BACKGROUND_ID.to_string(),
            data_configuration: ConfigurationKind::Foreground,
            transfer_configuration: ConfigurationKind::Background,
        }
    }
}

impl ServiceSettings {
    pub fn from_json(raw: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(raw).map_err(|e| ServiceError::Configuration(e.to_string()))
    }

    pub fn resolve(&self, kind: ConfigurationKind) -> Configuration {
        match kind {
            ConfigurationKind::Foreground => Configuration::Foreground,
            ConfigurationKind::Ephemeral => Configuration::Ephemeral,
            ConfigurationKind::Background => {
                Configuration::Background(self.background_identifier.clone())
            }
        }
    }
}
