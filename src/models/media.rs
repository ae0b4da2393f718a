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

//! Media models: stored references and pending uploads

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppError, AppResult};

/// Kind of media stored for a post
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// `image/*` is an image, anything else is treated as video
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            MediaType::Image
        } else {
            MediaType::Video
        }
    }
}

/// A media reference as stored in a post's `mediaUrls` column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    /// Public URL of the stored object
    pub url: String,

    /// Type of media
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

/// A file waiting to be uploaded to object storage
#[derive(Debug, Clone)]
pub struct MediaUpload {
    /// Original file name, kept in the storage path and in error messages
    pub file_name: String,

    /// MIME type reported by the picker or guessed from the extension
    pub content_type: String,

    /// File contents
    pub bytes: Vec<u8>,
}

impl MediaUpload {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn media_type(&self) -> MediaType {
        MediaType::from_content_type(&self.content_type)
    }

    pub fn is_image(&self) -> bool {
        self.media_type() == MediaType::Image
    }
}

/// A file reference sent by the UI over IPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFileRequest {
    /// Path to the file on the local disk
    pub file_path: String,

    /// MIME type, if the UI knows it
    #[serde(default)]
    pub content_type: Option<String>,
}

impl MediaFileRequest {
    /// Read the file into memory
    pub async fn load(&self) -> AppResult<MediaUpload> {
        let path = Path::new(&self.file_path);

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::Validation(format!("Ruta de archivo inválida: {}", self.file_path)))?
            .to_string();

        let bytes = tokio::fs::read(path).await.map_err(|e| AppError::Upload {
            file_name: file_name.clone(),
            message: e.to_string(),
        })?;

        let content_type = self
            .content_type
            .clone()
            .unwrap_or_else(|| guess_content_type(&file_name).to_string());

        Ok(MediaUpload {
            file_name,
            content_type,
            bytes,
        })
    }
}

/// Guess a MIME type from a file extension
pub fn guess_content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
