/*
 *  Copyright 2025-2026 ContentFlow Authors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Vault record access.

use tracing::warn;

use super::Stores;
use crate::capabilities::{DocumentFilter, Registry};
use crate::error::StoreError;
use crate::models::Vault;

#[derive(Clone)]
pub struct VaultStore<'a> {
    stores: &'a Stores,
}

impl<'a> VaultStore<'a> {
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Vault>, StoreError> {
        let container = &self.stores.containers.vaults;
        let doc = self.stores.registry.get(container, id).await?;
        match doc {
            Some(doc) => Ok(Some(doc.to_record()?)),
            None => Ok(None),
        }
    }

    /// Enabled vaults bound to the given pipeline.
    pub async fn list_enabled_for(&self, pipeline_id: &str) -> Result<Vec<Vault>, StoreError> {
        let container = &self.stores.containers.vaults;
        let filter = DocumentFilter::new()
            .eq("pipeline_id", pipeline_id)
            .eq("enabled", true);
        let docs = self.stores.registry.query(container, &filter).await?;

        let mut vaults = Vec::with_capacity(docs.len());
        for doc in docs {
            match doc.to_record::<Vault>() {
                Ok(vault) => vaults.push(vault),
                Err(e) => warn!(id = ?doc.id(), error = %e, "skipping malformed vault document"),
            }
        }
        Ok(vaults)
    }

    pub async fn upsert(&self, vault: &Vault) -> Result<(), StoreError> {
        let container = &self.stores.containers.vaults;
        let body = serde_json::to_value(vault)?;
        self.stores.registry.upsert(container, body).await?;
        Ok(())
    }
}
