use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use tether_core::TetherError;

use crate::schema::TetherConfig;

/// Loads and optionally hot-reloads the Tether configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<TetherConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > TETHER_CONFIG env > ~/.tether/tether.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("TETHER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tether")
            .join("tether.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> tether_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&config_path, &raw)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            TetherConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(TetherError::Config(e)),
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    fn parse(path: &Path, raw: &str) -> tether_core::Result<TetherConfig> {
        toml::from_str::<TetherConfig>(raw).map_err(|e| {
            TetherError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> TetherConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<TetherConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (TETHER_LOG_LEVEL, TETHER_CDP_PORT, etc.)
    pub fn apply_env_overrides(mut config: TetherConfig) -> TetherConfig {
        if let Ok(v) = std::env::var("TETHER_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("TETHER_SERVER_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("TETHER_CDP_PORT") {
            match v.parse::<u16>() {
                Ok(port) => config.session.cdp_port = port,
                Err(_) => warn!(value = %v, "ignoring invalid TETHER_CDP_PORT"),
            }
        }
        if let Ok(v) = std::env::var("TETHER_RESPONSE_TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(secs) => config.session.response_timeout_secs = secs,
                Err(_) => warn!(value = %v, "ignoring invalid TETHER_RESPONSE_TIMEOUT_SECS"),
            }
        }
        // The config file takes priority; the env var only fills a missing key.
        if config.server.api_key.is_none()
            && let Ok(v) = std::env::var("TETHER_API_KEY")
        {
            config.server.api_key = Some(v);
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> tether_core::Result<()> {
        if !self.config_path.exists() {
            return Err(TetherError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&self.config_path, &raw)?);
        new_config.validate().map_err(TetherError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads when the config file changes.
    /// The returned watcher must be kept alive for watching to continue.
    pub fn watch(&self) -> tether_core::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let path_for_event = self.config_path.clone();

        info!(config_path = ?self.config_path, "starting config file watcher");

        let mut watcher =
            notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "file watcher error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let is_our_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == path_for_event.file_name());
                if !is_our_file {
                    return;
                }

                info!("config file changed, reloading");
                let raw = match std::fs::read_to_string(&path_for_event) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, "failed to read config file during hot-reload");
                        return;
                    }
                };
                match ConfigLoader::parse(&path_for_event, &raw)
                    .map(ConfigLoader::apply_env_overrides)
                {
                    Ok(new_config) => match new_config.validate() {
                        Ok(_) => {
                            *config.write() = new_config;
                            info!("configuration hot-reloaded successfully");
                        }
                        Err(e) => warn!(error = %e, "config file has errors, keeping current config"),
                    },
                    Err(e) => warn!(error = %e, "config file has errors, keeping current config"),
                }
            })
            .map_err(|e| TetherError::Config(format!("failed to create file watcher: {e}")))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| TetherError::Config(format!("failed to watch config directory: {e}")))?;

        Ok(watcher)
    }
}
