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

//! Identity capability: produces credentials for the other capabilities.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IdentityError;

/// An opaque credential for a capability endpoint.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Identity: Send + Sync {
    /// Produces a credential valid for the given scope (endpoint URL or
    /// provider-specific resource identifier).
    async fn credential(&self, scope: &str) -> Result<Credential, IdentityError>;
}
