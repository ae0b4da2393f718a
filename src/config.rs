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

//! Runtime configuration loaded from the environment (and `.env`)

use std::env;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Default model for document analysis
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Default IPC endpoint name
#[cfg(windows)]
pub const DEFAULT_IPC_PATH: &str = r"\\.\pipe\marketplace_ipc";

/// Default IPC endpoint name
#[cfg(not(windows))]
pub const DEFAULT_IPC_PATH: &str = "/tmp/marketplace_ipc.sock";

/// Storage bucket names
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Listing photos and videos
    pub media: String,
    pub avatars: String,
    pub banners: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            media: "item-media".to_string(),
            avatars: "avatars".to_string(),
            banners: "banners".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Project URL of the hosted backend
    pub supabase_url: String,
    /// Public (anon) API key
    pub supabase_anon_key: String,
    /// API key for document analysis; verification is unavailable without it
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub buckets: BucketConfig,
    pub ipc_path: String,
    /// Where the cache database and logs live
    pub data_dir: PathBuf,
}

impl Config {
    /// Load `.env` (if present) and read the environment
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; used directly by tests
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Config(format!("{} must be set", key)))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let defaults = BucketConfig::default();

        Ok(Self {
            supabase_url: normalize_url(&required("SUPABASE_URL")?),
            supabase_anon_key: required("SUPABASE_ANON_KEY")?,
            gemini_api_key: optional("GEMINI_API_KEY"),
            gemini_model: optional("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            buckets: BucketConfig {
                media: optional("MEDIA_BUCKET").unwrap_or(defaults.media),
                avatars: optional("AVATAR_BUCKET").unwrap_or(defaults.avatars),
                banners: optional("BANNER_BUCKET").unwrap_or(defaults.banners),
            },
            ipc_path: optional("MARKETPLACE_IPC_PATH").unwrap_or_else(|| DEFAULT_IPC_PATH.to_string()),
            data_dir: optional("MARKETPLACE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
        })
    }

    /// Path of the local cache database
    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    /// Directory for rolling log files
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Platform data directory for the marketplace
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Marketplace")
}

/// Normalize a project URL
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    };

    // Remove trailing slash
    url.trim_end_matches('/').to_string()
}
