// Copyright 2026 SkyVision Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::analyze::KeywordWhitelist;
use crate::analyze::RegionMap;
use crate::plan::DistanceFn;

pub const ENV_EMBEDDING_DIM: &str = "SKYVISION_EMBEDDING_DIM";
pub const ENV_DISTANCE_FN: &str = "SKYVISION_DISTANCE_FN";
pub const ENV_STORE: &str = "SKYVISION_STORE";

const USUAL_DIMS: [usize; 4] = [256, 512, 768, 1024];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_path: PathBuf,
    pub embedding_dim: usize,
    pub embedding: String,
    pub distance_fn: String,
    pub result_cap: usize,
    pub default_k: usize,
    pub weight_text: f32,
    pub weight_image: f32,
    pub public_base_url: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub regions: Option<Vec<RegionEntry>>,
}

/// One entry of the ordered region table. Declaration order is match order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub name: String,
    pub countries: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("skyvision.db"),
            embedding_dim: 512,
            embedding: "hash".to_string(),
            distance_fn: DistanceFn::Cosine.sql_name().to_string(),
            result_cap: 1000,
            default_k: 1000,
            weight_text: 0.5,
            weight_image: 0.5,
            public_base_url: None,
            keywords: None,
            regions: None,
        }
    }
}

impl Config {
    /// Startup validation. Everything the planner substitutes into SQL as an
    /// identifier is checked here, once.
    pub fn validate(&mut self) -> Result<()> {
        let distance = self.distance()?;
        self.distance_fn = distance.sql_name().to_string();
        if self.embedding_dim == 0 {
            anyhow::bail!("embedding_dim must be greater than zero");
        }
        if self.result_cap == 0 {
            anyhow::bail!("result_cap must be greater than zero");
        }
        if !USUAL_DIMS.contains(&self.embedding_dim) {
            warn!(
                embedding_dim = self.embedding_dim,
                "embedding_dim looks unusual; ensure it matches the stored embeddings"
            );
        }
        if let Some(regions) = &self.regions
            && let Some(empty) = regions.iter().find(|r| r.countries.is_empty())
        {
            anyhow::bail!("region '{}' has no countries", empty.name);
        }
        Ok(())
    }

    pub fn distance(&self) -> Result<DistanceFn> {
        DistanceFn::parse(&self.distance_fn).ok_or_else(|| {
            anyhow::anyhow!(
                "unsupported distance_fn '{}'; supported: {}",
                self.distance_fn,
                DistanceFn::ALL
                    .iter()
                    .map(|d| d.sql_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }

    pub fn keyword_whitelist(&self) -> KeywordWhitelist {
        match &self.keywords {
            Some(words) => KeywordWhitelist::new(words.iter().map(String::as_str)),
            None => KeywordWhitelist::builtin(),
        }
    }

    pub fn region_map(&self) -> RegionMap {
        match &self.regions {
            Some(regions) => RegionMap::new(
                regions
                    .iter()
                    .map(|r| (r.name.clone(), r.countries.clone())),
            ),
            None => RegionMap::builtin(),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(ENV_EMBEDDING_DIM) {
            self.embedding_dim = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_EMBEDDING_DIM}={raw}"))?;
        }
        if let Ok(raw) = std::env::var(ENV_DISTANCE_FN) {
            self.distance_fn = raw.trim().to_string();
        }
        if let Ok(raw) = std::env::var(ENV_STORE) {
            self.store_path = PathBuf::from(raw);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigCtx {
    pub root: PathBuf,
    pub config: Config,
}

impl ConfigCtx {
    /// Resolves configuration for a command: explicit file, then the global
    /// config file, then defaults. Env overrides apply last.
    pub fn load(config_path: Option<&Path>, store: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => read_config(path)?,
            None => load_global_config()?,
        };
        config.apply_env_overrides()?;
        if let Some(store) = store {
            config.store_path = store;
        }
        config.validate()?;
        let root = std::env::current_dir().context("get current dir")?;
        Ok(Self { root, config })
    }

    pub fn store_path(&self) -> PathBuf {
        if self.config.store_path.is_absolute() {
            self.config.store_path.clone()
        } else {
            self.root.join(&self.config.store_path)
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata));
        }
        if let Ok(profile) = std::env::var("USERPROFILE") {
            return Some(PathBuf::from(profile).join("AppData").join("Roaming"));
        }
        return None;
    }

    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").ok()?;
        return Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support"),
        );
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config"))
}

pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("skyvision").join("skyvision.toml"))
}

pub fn load_global_config() -> Result<Config> {
    let Some(path) = global_config_path() else {
        return Ok(Config::default());
    };
    if !path.exists() {
        return Ok(Config::default());
    }
    read_config(&path)
}

pub fn read_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: Config =
        toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    Ok(config)
}
