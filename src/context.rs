//! Snapshot of the page environment the gate is evaluated against

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid page url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("page url '{0}' has no host")]
    MissingHost(String),
}

/// Immutable execution context (hostname, path, port)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub hostname: String,
    pub path: String,
    pub port: Option<String>,
}

impl ExecutionContext {
    pub fn new(hostname: impl Into<String>, path: impl Into<String>, port: Option<&str>) -> Self {
        Self {
            hostname: hostname.into(),
            path: path.into(),
            port: port.filter(|p| !p.is_empty()).map(str::to_string),
        }
    }

    /// Build a context from a full page URL. Default ports (80/443) yield `None`.
    pub fn from_url(raw: &str) -> Result<Self, ContextError> {
        let url = Url::parse(raw).map_err(|source| ContextError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;
        let hostname = url
            .host_str()
            .ok_or_else(|| ContextError::MissingHost(raw.to_string()))?
            .to_string();
        Ok(Self {
            hostname,
            path: url.path().to_string(),
            port: url.port().map(|p| p.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_with_port() {
        let ctx = ExecutionContext::from_url("http://dev.example.com:8080/a/b.html?x=1").unwrap();
        assert_eq!(ctx.hostname, "dev.example.com");
        assert_eq!(ctx.path, "/a/b.html");
        assert_eq!(ctx.port.as_deref(), Some("8080"));
    }

    #[test]
    fn test_from_url_default_port_is_none() {
        let ctx = ExecutionContext::from_url("https://example.com/").unwrap();
        assert_eq!(ctx.port, None);
        assert_eq!(ctx.path, "/");
    }

    #[test]
    fn test_from_url_keeps_percent_encoding_in_path() {
        let ctx = ExecutionContext::from_url("https://pms.example.com/g/p/files/feature%2Fx/index.html")
            .unwrap();
        assert_eq!(ctx.path, "/g/p/files/feature%2Fx/index.html");
    }

    #[test]
    fn test_from_url_rejects_garbage() {
        assert!(ExecutionContext::from_url("not a url").is_err());
    }

    #[test]
    fn test_new_treats_empty_port_as_none() {
        let ctx = ExecutionContext::new("example.com", "/", Some(""));
        assert_eq!(ctx.port, None);
    }
}
