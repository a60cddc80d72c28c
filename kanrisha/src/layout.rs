//! On-disk layout of the service directory.
//!
//! ```text
//! /etc/kanrisha.d/
//! ├── available/
//! │   └── <name>/
//! │       ├── run        # executable entry point
//! │       └── log        # stdout of the latest run
//! └── enabled/
//!     └── <name> -> ../available/<name>
//! ```

use crate::error::{Error, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of a service's entry point.
pub const ENTRY_POINT: &str = "run";

/// File name of a service's log.
pub const LOG_FILE: &str = "log";

/// Paths of the available and enabled service sets.
#[derive(Debug, Clone)]
pub struct ServiceLayout {
    root: PathBuf,
}

impl ServiceLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one directory per available service.
    pub fn available_dir(&self) -> PathBuf {
        self.root.join("available")
    }

    /// Directory holding one symlink per enabled service.
    pub fn enabled_dir(&self) -> PathBuf {
        self.root.join("enabled")
    }

    /// Check that `name` maps onto exactly one directory entry.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\0')
        {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(())
    }

    pub fn service_dir(&self, name: &str) -> PathBuf {
        self.available_dir().join(name)
    }

    pub fn entry_point(&self, name: &str) -> PathBuf {
        self.service_dir(name).join(ENTRY_POINT)
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.service_dir(name).join(LOG_FILE)
    }

    pub fn enabled_link(&self, name: &str) -> PathBuf {
        self.enabled_dir().join(name)
    }

    /// Create the available and enabled directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.available_dir())?;
        fs::create_dir_all(self.enabled_dir())?;
        Ok(())
    }

    /// Whether `name` is an available service.
    pub fn exists(&self, name: &str) -> bool {
        Self::validate_name(name).is_ok() && self.service_dir(name).is_dir()
    }

    /// Names of all available services, sorted.
    pub fn list_available(&self) -> Result<Vec<String>> {
        list_dirs(&self.available_dir())
    }

    /// Names of all enabled services, sorted.
    ///
    /// Links that no longer resolve to a directory are skipped.
    pub fn list_enabled(&self) -> Result<Vec<String>> {
        list_dirs(&self.enabled_dir())
    }

    /// Whether the enabled link for `name` exists.
    pub fn is_enabled(&self, name: &str) -> bool {
        fs::symlink_metadata(self.enabled_link(name)).is_ok()
    }

    /// Enable `name` by linking it into the enabled directory.
    pub fn enable(&self, name: &str) -> Result<()> {
        Self::validate_name(name)?;

        let target = self.service_dir(name);
        if !target.is_dir() {
            return Err(Error::NotFound(name.to_string()));
        }

        let link = self.enabled_link(name);
        match std::os::unix::fs::symlink(&target, &link) {
            Ok(()) => {
                debug!(service = %name, link = %link.display(), "Linked service");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::AlreadyEnabled(name.to_string()))
            }
            Err(e) => Err(Error::from_io(&link.display().to_string(), e)),
        }
    }

    /// Disable `name` by removing its enabled link.
    pub fn disable(&self, name: &str) -> Result<()> {
        Self::validate_name(name)?;

        let link = self.enabled_link(name);
        if fs::symlink_metadata(&link).is_err() {
            return Err(Error::AlreadyDisabled(name.to_string()));
        }

        fs::remove_file(&link).map_err(|e| Error::from_io(&link.display().to_string(), e))?;
        debug!(service = %name, link = %link.display(), "Unlinked service");
        Ok(())
    }

    /// Full contents of the service log, empty if it was never written.
    pub fn read_log(&self, name: &str) -> Result<String> {
        Self::validate_name(name)?;
        if !self.exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }

        let path = self.log_path(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::from_io(&path.display().to_string(), e)),
        }
    }

    /// Last `lines` lines of the service log.
    pub fn tail_log(&self, name: &str, lines: usize) -> Result<Vec<String>> {
        let content = self.read_log(name)?;
        let all: Vec<&str> = content.lines().collect();
        let skip = all.len().saturating_sub(lines);
        Ok(all[skip..].iter().map(|l| l.to_string()).collect())
    }

    /// Append a diagnostic line to the service log.
    pub fn append_log(&self, name: &str, line: &str) -> Result<()> {
        let path = self.log_path(name);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::from_io(&path.display().to_string(), e))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// List the entries of `dir` that are (or point at) directories.
fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(name = ?raw, "Skipping service with a non UTF-8 name");
                continue;
            }
        };

        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => names.push(name),
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable entry"),
        }
    }

    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_layout() -> (ServiceLayout, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = ServiceLayout::new(temp_dir.path());
        layout.ensure_dirs().unwrap();
        (layout, temp_dir)
    }

    fn add_service(layout: &ServiceLayout, name: &str) {
        fs::create_dir_all(layout.service_dir(name)).unwrap();
    }

    #[test]
    fn test_validate_name() {
        assert!(ServiceLayout::validate_name("sshd").is_ok());
        assert!(ServiceLayout::validate_name("getty@tty1").is_ok());
        assert!(ServiceLayout::validate_name("").is_err());
        assert!(ServiceLayout::validate_name("..").is_err());
        assert!(ServiceLayout::validate_name("../etc").is_err());
    }

    #[test]
    fn test_list_available_sorted_dirs_only() {
        let (layout, _temp_dir) = create_layout();
        add_service(&layout, "web");
        add_service(&layout, "cron");
        fs::write(layout.available_dir().join("README"), "not a service").unwrap();

        assert_eq!(layout.list_available().unwrap(), vec!["cron", "web"]);
    }

    #[test]
    fn test_enable_and_disable() {
        let (layout, _temp_dir) = create_layout();
        add_service(&layout, "web");

        layout.enable("web").unwrap();
        assert!(layout.is_enabled("web"));
        assert_eq!(layout.list_enabled().unwrap(), vec!["web"]);

        layout.disable("web").unwrap();
        assert!(!layout.is_enabled("web"));
        assert!(layout.list_enabled().unwrap().is_empty());
    }

    #[test]
    fn test_enable_twice_fails() {
        let (layout, _temp_dir) = create_layout();
        add_service(&layout, "web");

        layout.enable("web").unwrap();
        let before = fs::read_link(layout.enabled_link("web")).unwrap();

        assert!(matches!(layout.enable("web"), Err(Error::AlreadyEnabled(_))));
        assert_eq!(fs::read_link(layout.enabled_link("web")).unwrap(), before);
    }

    #[test]
    fn test_disable_twice_fails() {
        let (layout, _temp_dir) = create_layout();
        add_service(&layout, "web");

        layout.enable("web").unwrap();
        layout.disable("web").unwrap();
        assert!(matches!(layout.disable("web"), Err(Error::AlreadyDisabled(_))));
    }

    #[test]
    fn test_enable_missing_service() {
        let (layout, _temp_dir) = create_layout();
        assert!(matches!(layout.enable("ghost"), Err(Error::NotFound(_))));
        assert!(!layout.is_enabled("ghost"));
    }

    #[test]
    fn test_dangling_enabled_link_is_skipped() {
        let (layout, _temp_dir) = create_layout();
        add_service(&layout, "web");
        layout.enable("web").unwrap();
        fs::remove_dir(layout.service_dir("web")).unwrap();

        assert!(layout.list_enabled().unwrap().is_empty());
        layout.disable("web").unwrap();
    }

    #[test]
    fn test_read_and_tail_log() {
        let (layout, _temp_dir) = create_layout();
        add_service(&layout, "web");
        assert_eq!(layout.read_log("web").unwrap(), "");

        let lines: Vec<String> = (1..=10).map(|i| format!("line {}", i)).collect();
        fs::write(layout.log_path("web"), lines.join("\n")).unwrap();

        assert_eq!(layout.tail_log("web", 3).unwrap(), vec!["line 8", "line 9", "line 10"]);
        assert_eq!(layout.tail_log("web", 50).unwrap().len(), 10);
        assert!(matches!(layout.read_log("ghost"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_append_log() {
        let (layout, _temp_dir) = create_layout();
        add_service(&layout, "web");

        layout.append_log("web", "first").unwrap();
        layout.append_log("web", "second").unwrap();
        assert_eq!(layout.read_log("web").unwrap(), "first\nsecond\n");
    }
}
