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

//! Crawl checkpoint access.
//!
//! The watermark only moves forward: an advance with an older timestamp is
//! ignored, so a delayed writer can never rewind another crawl's progress.

use tracing::warn;

use super::{Stores, MAX_CONFLICT_RETRIES};
use crate::capabilities::{CreateOutcome, Registry, ReplaceOutcome};
use crate::error::StoreError;
use crate::models::{checkpoint_id, VaultCrawlCheckpoint};

#[derive(Clone)]
pub struct CheckpointStore<'a> {
    stores: &'a Stores,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }

    pub async fn get(
        &self,
        pipeline_id: &str,
        vault_id: &str,
        executor_id: &str,
    ) -> Result<Option<VaultCrawlCheckpoint>, StoreError> {
        let container = &self.stores.containers.checkpoints;
        let id = checkpoint_id(pipeline_id, vault_id, executor_id);
        let doc = self.stores.registry.get(container, &id).await?;
        match doc {
            Some(doc) => Ok(Some(doc.to_record()?)),
            None => Ok(None),
        }
    }

    /// Writes the checkpoint, keeping the watermark monotonic.
    pub async fn advance(&self, checkpoint: &VaultCrawlCheckpoint) -> Result<(), StoreError> {
        let container = &self.stores.containers.checkpoints;
        let body = serde_json::to_value(checkpoint)?;

        for _ in 0..MAX_CONFLICT_RETRIES {
            match self.stores.registry.get(container, &checkpoint.id).await? {
                None => {
                    match self
                        .stores
                        .registry
                        .create_if_absent(container, body.clone())
                        .await?
                    {
                        CreateOutcome::Created => return Ok(()),
                        CreateOutcome::Conflict => continue,
                    }
                }
                Some(doc) => {
                    let existing: VaultCrawlCheckpoint = doc.to_record()?;
                    if existing.checkpoint_timestamp > checkpoint.checkpoint_timestamp {
                        warn!(
                            checkpoint = %checkpoint.id,
                            existing = %existing.checkpoint_timestamp,
                            proposed = %checkpoint.checkpoint_timestamp,
                            "ignoring checkpoint advance with older watermark"
                        );
                        return Ok(());
                    }
                    match self
                        .stores
                        .registry
                        .replace_if(container, body.clone(), &doc.etag)
                        .await?
                    {
                        ReplaceOutcome::Replaced(_) => return Ok(()),
                        ReplaceOutcome::EtagMismatch | ReplaceOutcome::Missing => continue,
                    }
                }
            }
        }
        Err(StoreError::Conflict {
            container: container.clone(),
            id: checkpoint.id.clone(),
        })
    }
}
