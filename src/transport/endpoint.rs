//! Control endpoint address

use std::fmt;
use url::Url;

use crate::credentials::Credentials;
use crate::error::EndpointError;

/// Fixed endpoint URL plus the names of the credential query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    identity_param: String,
    license_param: String,
}

impl Endpoint {
    /// Parse a `ws://` or `wss://` URL
    pub fn parse(
        url: &str,
        identity_param: &str,
        license_param: &str,
    ) -> Result<Self, EndpointError> {
        let url = Url::parse(url)?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(EndpointError::MissingHost);
        }

        Ok(Self {
            url,
            identity_param: identity_param.to_string(),
            license_param: license_param.to_string(),
        })
    }

    /// True when the channel is TLS-secured
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Upgrade request URL with credentials as query parameters
    pub fn request_url(&self, credentials: &Credentials) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair(&self.identity_param, &credentials.identity_id)
            .append_pair(&self.license_param, &credentials.license);
        url
    }
}

/// Displays the endpoint without any credential material
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.url.scheme(), self.host())?;
        if let Some(port) = self.url.port() {
            write!(f, ":{}", port)?;
        }
        f.write_str(self.url.path())
    }
}
