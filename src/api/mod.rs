// Nochistlán Marketplace - community listings for items, jobs and rentals
// Copyright (C) 2025 Marketplace Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Access to the hosted backend and the document analysis service
//!
//! Everything that leaves the process goes through one of the traits below.
//! `SupabaseClient` and `GeminiClient` are the production implementations;
//! `MemoryBackend` stands in for all of them in tests.

mod client;
mod converter;
mod gemini;
mod query;
mod repository;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::models::{AuthSession, AuthUser, DocumentAnalysis, MediaUpload, SignUpOutcome};

pub use client::SupabaseClient;
pub use converter::{convert_post_row, convert_profile_row, new_post_row};
pub use gemini::{build_request, parse_generate_content, GeminiClient};
pub use query::{contains_pattern, ilike_matches, Filter, Order, Query};
pub use repository::{tables, MarketplaceRepository};

/// Sent with every outgoing HTTP request
pub(crate) const USER_AGENT: &str = concat!("marketplace-core/", env!("CARGO_PKG_VERSION"));

/// Row reads and writes with filter predicates, ordering and counts
#[async_trait]
pub trait Backend: Send + Sync {
    /// All rows matching the query
    async fn select(&self, query: &Query) -> AppResult<Vec<Value>>;

    /// Exact number of rows matching the query's filters
    async fn count(&self, query: &Query) -> AppResult<u64>;

    /// Insert one row and return the stored representation using `select`
    async fn insert(&self, table: &str, row: Value, select: &str) -> AppResult<Vec<Value>>;

    /// Apply `changes` to every matching row and return the updated rows
    async fn update(&self, query: &Query, changes: Value) -> AppResult<Vec<Value>>;

    /// Delete every matching row
    async fn delete(&self, query: &Query) -> AppResult<()>;

    /// Exactly one row; `NotFound` when there is none
    async fn select_single(&self, query: &Query) -> AppResult<Value> {
        self.select_maybe_single(query)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no row in {}", query.table)))
    }

    /// At most one row
    async fn select_maybe_single(&self, query: &Query) -> AppResult<Option<Value>> {
        let mut rows = self.select(&query.clone().limit(2)).await?;
        if rows.len() > 1 {
            return Err(AppError::Api {
                status: 406,
                message: format!("multiple rows returned from {}", query.table),
            });
        }
        Ok(rows.pop())
    }
}

/// Object storage: upload by path and public references
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, bucket: &str, path: &str, file: &MediaUpload, upsert: bool) -> AppResult<()>;

    /// Public URL of a stored object
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Hosted authentication
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> AppResult<SignUpOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> AppResult<()>;

    /// Send the sign-up confirmation e-mail again
    async fn resend_confirmation(&self, email: &str) -> AppResult<()>;

    async fn get_user(&self, access_token: &str) -> AppResult<AuthUser>;

    /// Merge `metadata` into the user's metadata
    async fn update_user_metadata(
        &self,
        access_token: &str,
        metadata: Map<String, Value>,
    ) -> AppResult<AuthUser>;

    /// Exchange a refresh token for a new session
    async fn refresh(&self, refresh_token: &str) -> AppResult<AuthSession>;

    /// Token later data requests run under; `None` means anonymous
    fn use_session_token(&self, _access_token: Option<String>) {}
}

/// Generative analysis of an identity document image
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze_id_document(&self, image: &MediaUpload) -> AppResult<DocumentAnalysis>;
}
