//! Single running agent per user

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the lifetime of the running agent; released on drop
pub struct InstanceLock {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl InstanceLock {
    /// Take the lock at `path`.
    ///
    /// Returns `Ok(None)` when another process already holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> io::Result<Option<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::fcntl::{Flock, FlockArg};

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => {
                    debug!(path = %path.display(), "Instance lock acquired");
                    Ok(Some(Self { path, _lock: lock }))
                }
                Err((_, Errno::EWOULDBLOCK)) => Ok(None),
                Err((_, errno)) => Err(io::Error::from(errno)),
            }
        }

        #[cfg(not(unix))]
        {
            debug!(path = %path.display(), "Instance lock file opened");
            Ok(Some(Self { path, _file: file }))
        }
    }

    /// Lock file next to the user's runtime or config data
    pub fn default_path() -> PathBuf {
        dirs::runtime_dir()
            .or_else(dirs::config_dir)
            .map(|dir| dir.join("wolskill").join("agent.lock"))
            .unwrap_or_else(|| std::env::temp_dir().join("wolskill-agent.lock"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
