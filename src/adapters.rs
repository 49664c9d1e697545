// Copyright 2026 BadCompany
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

//! Adapter stores: an in-memory map and a YAML/JSON file loader.

use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::models::{AdapterResource, ConnectionType};
use crate::gateway_core::traits::AdapterStore;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

#[derive(Default)]
pub struct InMemoryAdapterStore {
    adapters: RwLock<HashMap<String, AdapterResource>>,
}

impl InMemoryAdapterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapters(adapters: impl IntoIterator<Item = AdapterResource>) -> Self {
        let store = Self::new();
        for adapter in adapters {
            store.insert(adapter);
        }
        store
    }

    /// Insert or replace; returns the previous definition.
    pub fn insert(&self, adapter: AdapterResource) -> Option<AdapterResource> {
        self.adapters
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(adapter.name.clone(), adapter)
    }

    pub fn remove(&self, name: &str) -> Option<AdapterResource> {
        self.adapters
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name)
    }

    fn replace_all(&self, adapters: Vec<AdapterResource>) {
        let map = adapters.into_iter().map(|a| (a.name.clone(), a)).collect();
        *self.adapters.write().unwrap_or_else(|p| p.into_inner()) = map;
    }
}

#[async_trait]
impl AdapterStore for InMemoryAdapterStore {
    async fn get(&self, name: &str) -> Result<Option<AdapterResource>, GatewayError> {
        Ok(self
            .adapters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<AdapterResource>, GatewayError> {
        let mut all: Vec<AdapterResource> = self
            .adapters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}

/// Accepts a bare list or `adapters: [...]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AdapterFile {
    List(Vec<AdapterResource>),
    Wrapped { adapters: Vec<AdapterResource> },
}

/// Adapter definitions loaded from a YAML or JSON file.
pub struct FileAdapterStore {
    path: PathBuf,
    inner: InMemoryAdapterStore,
}

impl FileAdapterStore {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            inner: InMemoryAdapterStore::with_adapters(load(&path)?),
            path,
        };
        Ok(store)
    }

    /// Re-read the file; the old definitions stay if it no longer parses.
    pub fn reload(&self) -> Result<usize, GatewayError> {
        let adapters = load(&self.path)?;
        let count = adapters.len();
        self.inner.replace_all(adapters);
        info!(path = ?self.path, count, "Reloaded adapter definitions");
        Ok(count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AdapterStore for FileAdapterStore {
    async fn get(&self, name: &str) -> Result<Option<AdapterResource>, GatewayError> {
        self.inner.get(name).await
    }

    async fn list(&self) -> Result<Vec<AdapterResource>, GatewayError> {
        self.inner.list().await
    }
}

fn load(path: &Path) -> Result<Vec<AdapterResource>, GatewayError> {
    let content = fs::read_to_string(path).map_err(|e| {
        GatewayError::Configuration(format!("Failed to read adapters file {path:?}: {e}"))
    })?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let file: AdapterFile = if is_json {
        serde_json::from_str(&content)
            .map_err(|e| GatewayError::Configuration(format!("Failed to parse {path:?}: {e}")))?
    } else {
        serde_yaml_ng::from_str(&content)
            .map_err(|e| GatewayError::Configuration(format!("Failed to parse {path:?}: {e}")))?
    };
    let adapters = match file {
        AdapterFile::List(adapters) | AdapterFile::Wrapped { adapters } => adapters,
    };
    validate(&adapters)?;
    info!(path = ?path, count = adapters.len(), "Loaded adapter definitions");
    Ok(adapters)
}

fn validate(adapters: &[AdapterResource]) -> Result<(), GatewayError> {
    let mut seen = std::collections::HashSet::new();
    for adapter in adapters {
        if adapter.name.is_empty() {
            return Err(GatewayError::Configuration("adapter with empty name".into()));
        }
        if !seen.insert(adapter.name.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "duplicate adapter '{}'",
                adapter.name
            )));
        }
        if adapter.connection_type == ConnectionType::LocalStdio && adapter.launch_spec().is_none() {
            return Err(GatewayError::Configuration(format!(
                "adapter '{}' is LocalStdio but has no command",
                adapter.name
            )));
        }
        if adapter.connection_type == ConnectionType::RemoteHttp && adapter.remote_url.is_none() {
            return Err(GatewayError::Configuration(format!(
                "adapter '{}' is RemoteHttp but has no remoteUrl",
                adapter.name
            )));
        }
    }
    Ok(())
}
