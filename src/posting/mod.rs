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

//! Posting flow: upload media, then insert one listing

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::{new_post_row, MarketplaceRepository, ObjectStorage};
use crate::error::{AppError, AppResult};
use crate::models::{MediaRef, MediaUpload, Post, PostDraft};
use crate::session::SessionContext;

pub struct PostingService {
    repository: MarketplaceRepository,
    storage: Arc<dyn ObjectStorage>,
    session: Arc<SessionContext>,
    media_bucket: String,
}

impl PostingService {
    pub fn new(
        repository: MarketplaceRepository,
        storage: Arc<dyn ObjectStorage>,
        session: Arc<SessionContext>,
        media_bucket: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            storage,
            session,
            media_bucket: media_bucket.into(),
        }
    }

    /// Publish `draft` with `files` attached in the given order
    ///
    /// Uploads run one after another; the first failure aborts before the
    /// insert and objects already stored stay where they are.
    pub async fn create(&self, draft: PostDraft, files: Vec<MediaUpload>) -> AppResult<Post> {
        let user = self.session.require_user().await?;
        if !user.is_verified {
            return Err(AppError::Validation(
                "Debes verificar tu identidad antes de publicar.".to_string(),
            ));
        }

        draft.validate()?;

        let media = self.upload_all(&user.id, &files).await?;
        let row = new_post_row(&draft, &user.id, &media, Utc::now());
        let post = self.repository.insert_post(row).await?;

        info!(
            "Published {} {} with {} media file(s)",
            post.post_type(),
            post.id,
            post.media.len()
        );
        Ok(post)
    }

    async fn upload_all(&self, user_id: &str, files: &[MediaUpload]) -> AppResult<Vec<MediaRef>> {
        let mut media = Vec::with_capacity(files.len());

        for (index, file) in files.iter().enumerate() {
            let path = media_path(user_id, Utc::now().timestamp_millis(), index, &file.file_name);

            if let Err(e) = self.storage.upload(&self.media_bucket, &path, file, false).await {
                warn!(
                    "Upload {} of {} ({}) failed, aborting post: {}",
                    index + 1,
                    files.len(),
                    file.file_name,
                    e
                );
                return Err(AppError::Upload {
                    file_name: file.file_name.clone(),
                    message: e.to_string(),
                });
            }

            media.push(MediaRef {
                url: self.storage.public_url(&self.media_bucket, &path),
                media_type: file.media_type(),
            });
        }

        Ok(media)
    }
}

/// `<user>/<millis>-<index>-<file name>`; slashes in the name would create folders
fn media_path(user_id: &str, millis: i64, index: usize, file_name: &str) -> String {
    format!(
        "{}/{}-{}-{}",
        user_id,
        millis,
        index,
        file_name.replace(['/', '\\'], "_")
    )
}
