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

//! Collaborator seams.

use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::models::AdapterResource;
use async_trait::async_trait;

/// Read-only view of the adapter definition store.
#[async_trait]
pub trait AdapterStore: Send + Sync {
    /// Look up an adapter by name. `Ok(None)` means it does not exist.
    async fn get(&self, name: &str) -> Result<Option<AdapterResource>, GatewayError>;

    async fn list(&self) -> Result<Vec<AdapterResource>, GatewayError>;
}
