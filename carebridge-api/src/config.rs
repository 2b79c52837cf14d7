//! API Configuration Module
//!
//! CORS, WebSocket fan-out, paging and bind settings. Configuration is loaded
//! from environment variables with sensible defaults for development.

use std::net::SocketAddr;

use crate::error::{ApiError, ApiResult};

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS, event fan-out and the listener.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Service Configuration
    // ========================================================================
    /// Buffered events per WebSocket broadcast channel.
    pub ws_capacity: usize,

    /// Largest `limit` accepted by list endpoints.
    pub max_page_size: i64,

    /// Interface to bind.
    pub bind_host: String,

    /// Port to bind.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_allow_credentials: false,
            cors_max_age_secs: 86400, // 24 hours
            ws_capacity: 1000,
            max_page_size: 500,
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CAREBRIDGE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `CAREBRIDGE_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `CAREBRIDGE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `CAREBRIDGE_WS_CAPACITY`: Broadcast buffer size (default: 1000)
    /// - `CAREBRIDGE_MAX_PAGE_SIZE`: Upper bound for `limit` (default: 500)
    /// - `CAREBRIDGE_API_BIND`: Bind interface (default: 0.0.0.0)
    /// - `PORT` or `CAREBRIDGE_API_PORT`: Bind port (default: 3000)
    pub fn from_env() -> ApiResult<Self> {
        let defaults = Self::default();

        let cors_origins = std::env::var("CAREBRIDGE_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("CAREBRIDGE_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("CAREBRIDGE_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        let ws_capacity = std::env::var("CAREBRIDGE_WS_CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|c| *c > 0)
            .unwrap_or(defaults.ws_capacity);

        let max_page_size = std::env::var("CAREBRIDGE_MAX_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_page_size);

        let bind_host =
            std::env::var("CAREBRIDGE_API_BIND").unwrap_or_else(|_| defaults.bind_host.clone());

        let port = match std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("CAREBRIDGE_API_PORT").ok())
        {
            Some(port_str) => port_str.parse::<u16>().map_err(|_| {
                ApiError::invalid_input(format!("Invalid port value: {}", port_str))
            })?,
            None => defaults.port,
        };

        Ok(Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            ws_capacity,
            max_page_size,
            bind_host,
            port,
        })
    }

    /// Socket address the server listens on.
    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.org
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern));
                }
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.cors_origins.is_empty());
        assert!(!config.cors_allow_credentials);
        assert_eq!(config.cors_max_age_secs, 86400);
        assert_eq!(config.ws_capacity, 1000);
        assert_eq!(config.max_page_size, 500);
    }

    #[test]
    fn test_bind_addr() -> ApiResult<()> {
        let config = ApiConfig {
            bind_host: "127.0.0.1".to_string(),
            port: 8088,
            ..Default::default()
        };
        assert_eq!(config.bind_addr()?.port(), 8088);

        let bad = ApiConfig {
            bind_host: "not an address".to_string(),
            ..Default::default()
        };
        assert!(bad.bind_addr().is_err());
        Ok(())
    }

    #[test]
    fn test_is_production() {
        let mut config = ApiConfig::default();
        assert!(!config.is_production());

        config.cors_origins = vec!["https://ward.carebridge.health".to_string()];
        assert!(config.is_production());
    }

    #[test]
    fn test_origin_allowed_dev_mode() {
        let config = ApiConfig::default();
        assert!(config.is_origin_allowed("https://anything.com"));
        assert!(config.is_origin_allowed("http://localhost:3000"));
    }

    #[test]
    fn test_origin_allowed_production() {
        let config = ApiConfig {
            cors_origins: vec![
                "https://carebridge.health".to_string(),
                "*.carebridge.health".to_string(),
            ],
            ..Default::default()
        };

        assert!(config.is_origin_allowed("https://carebridge.health"));
        assert!(config.is_origin_allowed("https://billing.carebridge.health"));
        assert!(!config.is_origin_allowed("https://evil.com"));
        assert!(!config.is_origin_allowed("https://notcarebridge.health"));
    }
}
