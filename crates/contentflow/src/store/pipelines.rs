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

//! Pipeline record access.

use std::time::Duration;
use tracing::{debug, warn};

use super::Stores;
use crate::capabilities::{Clock, DocumentFilter, Registry};
use crate::error::StoreError;
use crate::models::Pipeline;

#[derive(Clone)]
pub struct PipelineStore<'a> {
    stores: &'a Stores,
}

impl<'a> PipelineStore<'a> {
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Pipeline>, StoreError> {
        let container = &self.stores.containers.pipelines;
        let doc = self.stores.registry.get(container, id).await?;
        match doc {
            Some(doc) => Ok(Some(doc.to_record()?)),
            None => Ok(None),
        }
    }

    /// Reads a pipeline with bounded retry.
    ///
    /// A task can be delivered before the records behind it are visible to
    /// this worker (eventual consistency between queue and registry), so a
    /// miss is retried a few times before the caller treats the pipeline as
    /// genuinely missing.
    pub async fn get_with_retry(
        &self,
        id: &str,
        attempts: usize,
        delay: Duration,
    ) -> Result<Option<Pipeline>, StoreError> {
        for attempt in 1..=attempts {
            if let Some(pipeline) = self.get(id).await? {
                return Ok(Some(pipeline));
            }
            if attempt < attempts {
                debug!(
                    pipeline_id = id,
                    attempt, "pipeline not visible yet, retrying read"
                );
                self.stores.clock.sleep(delay).await;
            }
        }
        Ok(None)
    }

    /// All enabled pipelines. Documents that fail to deserialize are skipped
    /// with a warning rather than poisoning the whole scheduler tick.
    pub async fn list_enabled(&self) -> Result<Vec<Pipeline>, StoreError> {
        let container = &self.stores.containers.pipelines;
        let filter = DocumentFilter::new().eq("enabled", true);
        let docs = self.stores.registry.query(container, &filter).await?;

        let mut pipelines = Vec::with_capacity(docs.len());
        for doc in docs {
            match doc.to_record::<Pipeline>() {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e) => warn!(id = ?doc.id(), error = %e, "skipping malformed pipeline document"),
            }
        }
        Ok(pipelines)
    }

    pub async fn upsert(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        let container = &self.stores.containers.pipelines;
        let body = serde_json::to_value(pipeline)?;
        self.stores.registry.upsert(container, body).await?;
        Ok(())
    }
}
