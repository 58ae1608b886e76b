use std::collections::HashMap;
use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

use shelfsync_core::platforms::{
    CommerceConfig, CrmAuth, CrmConfig, WorkspaceConfig, DEFAULT_API_VERSION,
    DEFAULT_CRM_API_URL, DEFAULT_WORKSPACE_API_URL,
};
use shelfsync_core::retry::RetryPolicy;
use shelfsync_core::util::is_http_url;
use thiserror::Error;

/// Floor for a single outbound HTTP request
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Secrets are redacted by the platform config `Debug` impls
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub commerce: CommerceConfig,
    pub crm: Option<CrmConfig>,
    pub workspace: Option<WorkspaceConfig>,
    pub idempotency_lock: Duration,
    pub publish_retries: u32,
    /// Budget for one platform, retries included
    pub platform_timeout: Duration,
    pub rate_limit_window: Duration,
    pub mutation_rate_limit_per_window: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "SHELFSYNC_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "SHELFSYNC_DATABASE_PATH", "shelfsync.db");

        let idempotency_lock_secs =
            parse_in_range(&lookup, "IDEMPOTENCY_LOCK_SECS", 300, 30..=3_600)?;
        let publish_retries = parse_in_range(&lookup, "PUBLISH_RETRIES", 3, 0..=10)?;
        let platform_timeout_secs = parse_in_range(&lookup, "PLATFORM_TIMEOUT_SECS", 60, 5..=600)?;
        let rate_limit_window_secs =
            parse_in_range(&lookup, "RATE_LIMIT_WINDOW_SECS", 60, 10..=3_600)?;
        let mutation_rate_limit_per_window =
            parse_in_range(&lookup, "MUTATION_RATE_LIMIT_PER_WINDOW", 60, 1..=5_000)?;

        let publish_retries = u32::try_from(publish_retries)
            .map_err(|_| ConfigError::Invalid("PUBLISH_RETRIES is out of range".to_string()))?;
        let mutation_rate_limit_per_window = u32::try_from(mutation_rate_limit_per_window)
            .map_err(|_| {
                ConfigError::Invalid("MUTATION_RATE_LIMIT_PER_WINDOW is out of range".to_string())
            })?;

        let platform_timeout = Duration::from_secs(platform_timeout_secs);
        let request_timeout = (platform_timeout / (publish_retries + 1)).max(MIN_REQUEST_TIMEOUT);

        let shop_domain = required_trimmed(&lookup, "COMMERCE_SHOP_DOMAIN")?;
        if shop_domain.contains("://") || shop_domain.contains('/') {
            return Err(ConfigError::Invalid(
                "COMMERCE_SHOP_DOMAIN must be a bare host such as example.myshopify.com"
                    .to_string(),
            ));
        }
        let commerce = CommerceConfig {
            shop_domain,
            access_token: optional_trimmed(&lookup, "COMMERCE_ACCESS_TOKEN"),
            api_version: value_or_default(&lookup, "COMMERCE_API_VERSION", DEFAULT_API_VERSION),
            timeout: request_timeout,
        };

        let crm = parse_crm_config(&lookup, request_timeout)?;
        let workspace = parse_workspace_config(&lookup, request_timeout)?;

        Ok(Self {
            bind_addr,
            database_path,
            commerce,
            crm,
            workspace,
            idempotency_lock: Duration::from_secs(idempotency_lock_secs),
            publish_retries,
            platform_timeout,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            mutation_rate_limit_per_window,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.publish_retries,
            ..RetryPolicy::default()
        }
    }
}

fn parse_crm_config(
    lookup: impl Fn(&str) -> Option<String>,
    timeout: Duration,
) -> Result<Option<CrmConfig>, ConfigError> {
    let static_token = optional_trimmed(&lookup, "CRM_ACCESS_TOKEN");
    let client_id = optional_trimmed(&lookup, "CRM_CLIENT_ID");
    let client_secret = optional_trimmed(&lookup, "CRM_CLIENT_SECRET");
    let token_url = optional_trimmed(&lookup, "CRM_TOKEN_URL");

    let auth = if let Some(token) = static_token {
        CrmAuth::Static(token)
    } else {
        let any_set = client_id.is_some() || client_secret.is_some() || token_url.is_some();
        if !any_set {
            return Ok(None);
        }
        let client_id = client_id.ok_or(ConfigError::MissingVar("CRM_CLIENT_ID"))?;
        let client_secret = client_secret.ok_or(ConfigError::MissingVar("CRM_CLIENT_SECRET"))?;
        let token_url = token_url.ok_or(ConfigError::MissingVar("CRM_TOKEN_URL"))?;
        if !is_http_url(&token_url) {
            return Err(ConfigError::Invalid(
                "CRM_TOKEN_URL must start with http:// or https://".to_string(),
            ));
        }
        CrmAuth::ClientCredentials {
            client_id,
            client_secret,
            token_url,
        }
    };

    let api_url = value_or_default(&lookup, "CRM_API_URL", DEFAULT_CRM_API_URL);
    if !is_http_url(&api_url) {
        return Err(ConfigError::Invalid(
            "CRM_API_URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(Some(CrmConfig {
        api_url: trim_trailing(&api_url).to_string(),
        auth,
        pipeline_id: optional_trimmed(&lookup, "CRM_PIPELINE_ID"),
        deal_stage: optional_trimmed(&lookup, "CRM_DEAL_STAGE"),
        timeout,
    }))
}

fn parse_workspace_config(
    lookup: impl Fn(&str) -> Option<String>,
    timeout: Duration,
) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let token = optional_trimmed(&lookup, "WORKSPACE_TOKEN");
    let database_id = optional_trimmed(&lookup, "WORKSPACE_DATABASE_ID");
    let (token, database_id) = match (token, database_id) {
        (None, None) => return Ok(None),
        (Some(_), None) => return Err(ConfigError::MissingVar("WORKSPACE_DATABASE_ID")),
        (None, Some(_)) => return Err(ConfigError::MissingVar("WORKSPACE_TOKEN")),
        (Some(token), Some(database_id)) => (token, database_id),
    };

    let api_url = value_or_default(&lookup, "WORKSPACE_API_URL", DEFAULT_WORKSPACE_API_URL);
    if !is_http_url(&api_url) {
        return Err(ConfigError::Invalid(
            "WORKSPACE_API_URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(Some(WorkspaceConfig {
        api_url: trim_trailing(&api_url).to_string(),
        token,
        database_id,
        timeout,
    }))
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?,
        None => default,
    };
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches('/')
}
