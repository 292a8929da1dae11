//! Remote node identity.
//!
//! A connection is identified by its endpoint and credentials, never by the
//! client object that happens to use it. Two handles built independently for
//! the same node compare equal.

use crate::error::RpcError;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcConnection {
    uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

impl RpcConnection {
    /// Connection without credentials.
    pub fn new(uri: &str) -> Self {
        Self {
            uri: normalize_uri(uri),
            username: None,
            password: None,
        }
    }

    /// Connection with Basic auth credentials.
    ///
    /// Username and password must be given together.
    pub fn with_credentials(
        uri: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, RpcError> {
        let username = username.filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());
        match (username, password) {
            (Some(_), None) => Err(RpcError::InvalidConnection(
                "username given without password".into(),
            )),
            (None, Some(_)) => Err(RpcError::InvalidConnection(
                "password given without username".into(),
            )),
            _ => Ok(Self {
                uri: normalize_uri(uri),
                username: username.map(str::to_string),
                password: password.map(str::to_string),
            }),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Absolute URL for a path on this node.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.uri, path)
        } else {
            format!("{}/{}", self.uri, path)
        }
    }

    /// `Authorization` header value, if credentials are set.
    pub fn basic_auth(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                let creds = format!("{}:{}", user, pass);
                let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
                Some(format!("Basic {}", encoded))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.username {
            Some(user) => write!(f, "{} (user {})", self.uri, user),
            None => f.write_str(&self.uri),
        }
    }
}

fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
