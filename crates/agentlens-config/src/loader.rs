// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/agentlens/config.yaml"));
    paths.push(PathBuf::from("/etc/agentlens/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/agentlens/config.yaml"));
        paths.push(home.join(".config/agentlens/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("agentlens/config.yaml"));
        paths.push(cfg.join("agentlens/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".agentlens/config.yaml"));
    paths.push(PathBuf::from(".agentlens/config.yml"));
    paths.push(PathBuf::from(".agentlens.yaml"));
    paths.push(PathBuf::from(".agentlens.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. a host-supplied override).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    config.endpoint = config.endpoint.trim_end_matches('/').to_string();
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

/// A loaded [`Config`] paired with an `onChange` subscription.
///
/// Holds the `tokio::sync::watch` sender half so [`ConfigHandle::reload`] can
/// re-read the search-path files and push the new snapshot to every
/// subscriber; a `watch` channel (rather than `broadcast`) is the right fit
/// here because there is always a well-defined "current value" new
/// subscribers should see immediately, not just future changes.
pub struct ConfigHandle {
    extra_path: Option<PathBuf>,
    tx: tokio::sync::watch::Sender<Config>,
}

impl ConfigHandle {
    /// Load the initial configuration and create a handle around it.
    pub fn load(extra: Option<&Path>) -> anyhow::Result<Self> {
        let initial = load(extra)?;
        let (tx, _rx) = tokio::sync::watch::channel(initial);
        Ok(Self { extra_path: extra.map(Path::to_path_buf), tx })
    }

    /// The current configuration snapshot.
    pub fn current(&self) -> Config {
        self.tx.borrow().clone()
    }

    /// Subscribe to configuration changes. The receiver immediately observes
    /// the current value, then every value pushed by `reload()`.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Config> {
        self.tx.subscribe()
    }

    /// Re-read the search-path files and push the new snapshot to every
    /// subscriber, if anything changed.
    pub fn reload(&self) -> anyhow::Result<()> {
        let fresh = load(self.extra_path.as_deref())?;
        self.tx.send_if_modified(|current| {
            if *current != fresh {
                *current = fresh.clone();
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
