//! Credential storage
//!
//! Credentials live in a small TOML file in the user's configuration
//! directory, readable only by the owner on unix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::CredentialsConfig;
use crate::error::StoreError;

/// Identity id and license token presented to the endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub identity_id: String,
    pub license: String,
}

impl Credentials {
    pub fn new(identity_id: impl Into<String>, license: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            license: license.into(),
        }
    }

    /// Both fields are required to connect
    pub fn is_valid(&self) -> bool {
        !self.identity_id.trim().is_empty() && !self.license.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity_id", &self.identity_id)
            .field("license", &"<redacted>")
            .finish()
    }
}

/// File-backed credential store
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the configured path, or the per-user default
    pub fn from_config(config: &CredentialsConfig) -> Result<Self, StoreError> {
        match &config.path {
            Some(path) => Ok(Self::new(path)),
            None => Self::default_location(),
        }
    }

    /// `<config dir>/wolskill/credentials.toml`
    pub fn default_location() -> Result<Self, StoreError> {
        let dir = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
        Ok(Self::new(dir.join("wolskill").join("credentials.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load usable credentials; absent when missing, unreadable or incomplete
    pub fn load(&self) -> Option<Credentials> {
        match self.try_load() {
            Ok(Some(credentials)) if credentials.is_valid() => Some(credentials),
            Ok(Some(_)) => {
                warn!(path = ?self.path, "Stored credentials are incomplete");
                None
            }
            Ok(None) => {
                debug!(path = ?self.path, "No stored credentials");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load credentials");
                None
            }
        }
    }

    /// Load credentials, distinguishing a missing file from a broken one
    pub fn try_load(&self) -> Result<Option<Credentials>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        toml::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                path: self.path.clone(),
                source,
            })
    }

    /// Persist credentials, creating the parent directory if needed
    pub fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = toml::to_string(credentials)?;
        std::fs::write(&self.path, contents).map_err(io_err)?;
        restrict_permissions(&self.path).map_err(io_err)?;

        info!(path = ?self.path, identity_id = %credentials.identity_id, "Credentials saved");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
