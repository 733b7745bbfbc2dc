use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::glob::normalize_path_text;
use super::{Config, CONFIG_FILE_NAME};
use crate::error::ScanError;

/// Resolves the policy that applies to a path.
///
/// Configs are keyed by the directory they govern. A lookup walks from the
/// given path towards the root and returns the first config found, falling
/// back to the default config. The manager is built once per scan and only
/// read afterwards, so it can be shared freely between tasks.
#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    default_config: Config,
    override_config: Option<Config>,
    configs: BTreeMap<String, Config>,
}

impl ConfigManager {
    pub fn new(default_config: Config) -> Self {
        Self {
            default_config,
            override_config: None,
            configs: BTreeMap::new(),
        }
    }

    /// A manager that answers every lookup with `config`.
    pub fn with_override(config: Config) -> Self {
        Self {
            default_config: Config::default(),
            override_config: Some(config),
            configs: BTreeMap::new(),
        }
    }

    /// Registers the policy for `dir` and everything below it.
    ///
    /// Relative directories are resolved against the working directory.
    pub fn insert(&mut self, dir: &Path, config: Config) {
        self.configs.insert(normalize(&absolute(dir)), config);
    }

    /// Builds a manager from every `depscan.toml` under `root`.
    ///
    /// In strict mode the first unreadable directory or invalid policy file
    /// aborts discovery. Otherwise the error is logged; an invalid file's
    /// directory falls back to the default config.
    pub fn discover(root: &Path, default_config: Config, strict: bool) -> Result<Self, ScanError> {
        let mut manager = Self::new(default_config);
        let root = absolute(root);

        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(&root).to_path_buf();
                    if strict {
                        return Err(ScanError::Io {
                            path,
                            source: err.into(),
                        });
                    }
                    warn!("Skipping {} during config discovery: {}", path.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != CONFIG_FILE_NAME {
                continue;
            }

            let path = entry.path();
            let dir = path.parent().unwrap_or(&root);

            match Config::load(path) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    manager.insert(dir, config);
                }
                Err(err) if strict => return Err(err),
                Err(err) => {
                    warn!("Ignoring invalid config, using defaults instead: {}", err);
                    let fallback = manager.default_config.clone();
                    manager.insert(dir, fallback);
                }
            }
        }

        Ok(manager)
    }

    /// Returns the most specific config for `path`.
    pub fn get(&self, path: &Path) -> &Config {
        if let Some(config) = &self.override_config {
            return config;
        }

        let mut current = normalize(&absolute(path));
        loop {
            if let Some(config) = self.configs.get(&current) {
                return config;
            }
            match parent(&current) {
                Some(up) => current = up,
                None => return &self.default_config,
            }
        }
    }

    pub fn default_config(&self) -> &Config {
        &self.default_config
    }

    /// Number of directory-specific configs.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// `path` resolved against the working directory if it is relative.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Lexically normalizes a path: `/` separators, no `.` components, `..`
/// resolved against the preceding component, no trailing separator.
fn normalize(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut prefix = String::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
            Component::RootDir => prefix.push('/'),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.last().is_some_and(|p| p != "..") {
                    parts.pop();
                } else if prefix.is_empty() {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }

    normalize_path_text(&format!("{prefix}{}", parts.join("/")))
}

/// The key one level up, or `None` at the root.
fn parent(key: &str) -> Option<String> {
    if key.is_empty() || (key.ends_with('/') && !key[..key.len() - 1].contains('/')) {
        return None;
    }
    match key.rfind('/') {
        // Keep the root separator, e.g. "/repo" -> "/" or "C:/repo" -> "C:/".
        Some(i) if !key[..i].contains('/') && (i == 0 || key[..i].ends_with(':')) => {
            Some(key[..=i].to_string())
        }
        Some(i) => Some(key[..i].to_string()),
        None => Some(String::new()),
    }
}
