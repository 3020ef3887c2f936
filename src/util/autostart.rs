//! "Run on startup" via an XDG autostart entry

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const ENTRY_NAME: &str = "wolskill-agent.desktop";

/// Autostart entry location
#[derive(Debug, Clone)]
pub struct Autostart {
    entry: PathBuf,
}

impl Autostart {
    pub fn new(entry: impl Into<PathBuf>) -> Self {
        Self {
            entry: entry.into(),
        }
    }

    /// `$XDG_CONFIG_HOME/autostart/wolskill-agent.desktop`
    pub fn user_default() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join("autostart").join(ENTRY_NAME)))
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry
    }

    /// True if an entry exists and launches `exe`
    pub fn is_enabled(&self, exe: &Path) -> io::Result<bool> {
        match fs::read_to_string(&self.entry) {
            Ok(contents) => Ok(contents
                .lines()
                .filter_map(|line| line.strip_prefix("Exec="))
                .any(|cmd| cmd.trim() == exec_line(exe))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write or remove the entry
    pub fn set(&self, enabled: bool, exe: &Path) -> io::Result<()> {
        if enabled {
            if let Some(parent) = self.entry.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.entry, desktop_entry(exe))
        } else {
            match fs::remove_file(&self.entry) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        }
    }
}

fn exec_line(exe: &Path) -> String {
    format!("\"{}\" run", exe.display())
}

fn desktop_entry(exe: &Path) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=WolSkill Agent\n\
         Comment=Remote power-off agent\n\
         Exec={}\n\
         Terminal=false\n\
         X-GNOME-Autostart-enabled=true\n",
        exec_line(exe)
    )
}
