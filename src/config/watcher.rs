//! Configuration file watcher for hot reload.
//!
//! Reloaded files are validated and compared with the configuration in
//! effect. Only authentication settings apply live, so a reload is
//! forwarded only when one of them changed; edits to other sections are
//! logged as waiting for a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{AuthConfig, ServiceConfig};
use crate::config::validation::validate_config;

/// Authentication fields the gate picks up without a restart.
pub fn live_auth_changes(old: &AuthConfig, new: &AuthConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.enabled != new.enabled {
        changed.push("auth.enabled");
    }
    if old.signing_key != new.signing_key {
        changed.push("auth.signing_key");
    }
    if old.policy_name != new.policy_name {
        changed.push("auth.policy_name");
    }
    if old.token_ttl_secs != new.token_ttl_secs {
        changed.push("auth.token_ttl_secs");
    }
    if old.authorization_header != new.authorization_header {
        changed.push("auth.authorization_header");
    }
    changed
}

/// Changed settings that only take effect after a restart.
pub fn restart_only_changes(old: &ServiceConfig, new: &ServiceConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.listener != new.listener {
        changed.push("listener");
    }
    if old.websocket != new.websocket {
        changed.push("websocket");
    }
    if old.probes != new.probes {
        changed.push("probes");
    }
    if old.observability != new.observability {
        changed.push("observability");
    }
    if old.auth.authentication_path != new.auth.authentication_path {
        changed.push("auth.authentication_path");
    }
    if old.auth.users != new.auth.users {
        changed.push("auth.users");
    }
    changed
}

/// Tracks the configuration in effect between reloads.
struct ReloadState {
    current: ServiceConfig,
}

impl ReloadState {
    /// Accept `candidate` if it is valid. Returns it when the gate must be
    /// updated.
    fn apply(&mut self, candidate: ServiceConfig) -> Option<ServiceConfig> {
        if let Err(errors) = validate_config(&candidate) {
            for error in &errors {
                tracing::error!(%error, "Reloaded config is invalid");
            }
            tracing::error!(
                count = errors.len(),
                "Keeping current configuration"
            );
            return None;
        }

        let live = live_auth_changes(&self.current.auth, &candidate.auth);
        let deferred = restart_only_changes(&self.current, &candidate);

        if !deferred.is_empty() {
            tracing::warn!(changed = ?deferred, "Config changes apply after restart");
        }

        self.current = candidate;

        if live.is_empty() {
            tracing::debug!("No authentication settings changed");
            return None;
        }

        tracing::info!(changed = ?live, "Applying authentication settings from reloaded config");
        Some(self.current.clone())
    }
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    state: ReloadState,
    update_tx: mpsc::UnboundedSender<ServiceConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, starting from the config in effect.
    ///
    /// Returns the watcher and a receiver for configurations whose
    /// authentication settings changed.
    pub fn new(
        path: &Path,
        current: ServiceConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                state: ReloadState { current },
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let ConfigWatcher {
            path,
            mut state,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&watched) {
                        Ok(candidate) => {
                            if let Some(update) = state.apply(candidate) {
                                if update_tx.send(update).is_err() {
                                    tracing::debug!("Config update receiver dropped");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(path = ?watched, error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
