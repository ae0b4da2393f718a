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

//! Profile page: profile record, listings, follow counts and follow toggle,
//! plus editing one's own profile

use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{MarketplaceRepository, ObjectStorage};
use crate::config::BucketConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    AppUser, FollowEdge, FollowStats, FollowToggle, MediaUpload, ProfileUpdate, ProfileView,
};
use crate::session::SessionContext;

/// Clears the in-flight flag when the toggle finishes, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A loaded page and the viewer it was loaded for
struct LoadedPage {
    /// `None` when loaded signed out
    viewer_id: Option<String>,
    view: ProfileView,
}

pub struct ProfileController {
    repository: MarketplaceRepository,
    storage: Arc<dyn ObjectStorage>,
    session: Arc<SessionContext>,
    buckets: BucketConfig,
    /// Last loaded profile page
    current: Mutex<Option<LoadedPage>>,
    toggling: AtomicBool,
}

impl ProfileController {
    pub fn new(
        repository: MarketplaceRepository,
        storage: Arc<dyn ObjectStorage>,
        session: Arc<SessionContext>,
        buckets: BucketConfig,
    ) -> Self {
        Self {
            repository,
            storage,
            session,
            buckets,
            current: Mutex::new(None),
            toggling: AtomicBool::new(false),
        }
    }

    /// Fetch everything the profile page shows for `profile_id`
    ///
    /// Only a missing profile fails the page. Listings, counts and the edge
    /// lookup that cannot be read show as empty, zero and not following.
    pub async fn load(&self, profile_id: &str) -> AppResult<ProfileView> {
        let viewer = self.session.current_user().await;
        let profile = self.repository.get_profile(profile_id).await?;

        let (posts, followers, following) = futures::join!(
            self.repository.posts_by_user(profile_id),
            self.repository.count_followers(profile_id),
            self.repository.count_following(profile_id),
        );
        let posts = posts.unwrap_or_else(|e| {
            warn!("Listings of {} unavailable: {}", profile_id, e);
            Vec::new()
        });
        let followers = followers.unwrap_or_else(|e| {
            warn!("Follower count of {} unavailable: {}", profile_id, e);
            0
        });
        let following = following.unwrap_or_else(|e| {
            warn!("Following count of {} unavailable: {}", profile_id, e);
            0
        });

        let is_own_profile = viewer.as_ref().map(|v| v.id == profile_id).unwrap_or(false);
        let is_following = match &viewer {
            Some(viewer) if !is_own_profile => self
                .repository
                .follow_exists(&FollowEdge::new(viewer.id.as_str(), profile_id))
                .await
                .unwrap_or_else(|e| {
                    warn!("Follow state for {} unavailable: {}", profile_id, e);
                    false
                }),
            _ => false,
        };

        let view = ProfileView {
            profile,
            posts,
            stats: FollowStats {
                followers,
                following,
            },
            is_following,
            is_own_profile,
        };

        debug!(
            "Loaded profile {}: {} posts, {} followers",
            profile_id,
            view.posts.len(),
            followers
        );

        *self.current.lock().await = Some(LoadedPage {
            viewer_id: viewer.map(|v| v.id),
            view: view.clone(),
        });
        Ok(view)
    }

    /// Last loaded profile page
    pub async fn current(&self) -> Option<ProfileView> {
        self.current.lock().await.as_ref().map(|page| page.view.clone())
    }

    /// Whether a follow toggle is running
    pub fn is_toggling(&self) -> bool {
        self.toggling.load(Ordering::Acquire)
    }

    /// Follow or unfollow `profile_id` as the signed-in viewer
    ///
    /// After a successful write the follower count is re-read; only when that
    /// read fails is the displayed count adjusted by one. A failed write
    /// changes nothing.
    pub async fn toggle_follow(&self, profile_id: &str) -> AppResult<FollowToggle> {
        let viewer = self.session.require_user().await?;
        if viewer.id == profile_id {
            return Err(AppError::Validation("No puedes seguirte a ti mismo.".to_string()));
        }

        if self.toggling.swap(true, Ordering::AcqRel) {
            return Err(AppError::Busy);
        }
        let _in_flight = InFlight(&self.toggling);

        let edge = FollowEdge::new(viewer.id.as_str(), profile_id);
        let (was_following, displayed) = self.displayed_state(&edge).await?;

        if was_following {
            self.repository.delete_follow(&edge).await?;
        } else {
            self.repository.insert_follow(&edge).await?;
        }
        let is_following = !was_following;

        let (followers, reconciled) = match self.repository.count_followers(profile_id).await {
            Ok(count) => (count, true),
            Err(e) => {
                warn!("Follower count re-read failed, adjusting locally: {}", e);
                let adjusted = if is_following {
                    displayed.saturating_add(1)
                } else {
                    displayed.saturating_sub(1)
                };
                (adjusted, false)
            }
        };

        if let Some(page) = self.current.lock().await.as_mut() {
            if page.view.profile.id == profile_id {
                page.viewer_id = Some(viewer.id.clone());
                page.view.is_following = is_following;
                page.view.stats.followers = followers;
            }
        }

        info!(
            "{} {} {}",
            viewer.id,
            if is_following { "followed" } else { "unfollowed" },
            profile_id
        );

        Ok(FollowToggle {
            is_following,
            followers,
            reconciled,
        })
    }

    /// Edge state and follower count as currently displayed
    ///
    /// The loaded page is only trusted when it was loaded for this follower;
    /// otherwise both values are read from the backend.
    async fn displayed_state(&self, edge: &FollowEdge) -> AppResult<(bool, u64)> {
        if let Some(page) = self.current.lock().await.as_ref() {
            if page.view.profile.id == edge.following_id
                && page.viewer_id.as_deref() == Some(edge.follower_id.as_str())
            {
                return Ok((page.view.is_following, page.view.stats.followers));
            }
        }

        let exists = self.repository.follow_exists(edge).await?;
        let followers = self.repository.count_followers(&edge.following_id).await?;
        Ok((exists, followers))
    }

    /// Save name, location and optionally new avatar/banner images
    pub async fn update_profile(&self, update: ProfileUpdate) -> AppResult<AppUser> {
        let user = self.session.require_user().await?;

        let name = update.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("El nombre es obligatorio.".to_string()));
        }

        let mut avatar_url = user.avatar_url.clone();
        if let Some(avatar) = &update.avatar {
            let path = format!("public/{}-avatar.png", user.id);
            avatar_url = Some(self.upload_image(&self.buckets.avatars, &path, avatar).await?);
        }

        let mut banner_url = user.banner_url.clone();
        if let Some(banner) = &update.banner {
            let path = format!("public/{}-banner.png", user.id);
            banner_url = Some(self.upload_image(&self.buckets.banners, &path, banner).await?);
        }

        let updated = self
            .repository
            .update_profile(
                &user.id,
                json!({
                    "name": name,
                    "location": update.location.trim(),
                    "avatar_url": avatar_url,
                    "banner_url": banner_url,
                }),
            )
            .await?;

        if let (Some(profile), Some(page)) = (updated, self.current.lock().await.as_mut()) {
            if page.view.profile.id == profile.id {
                page.view.profile = profile;
            }
        }

        info!("Profile {} updated", user.id);

        self.session
            .refresh()
            .await?
            .ok_or(AppError::NotAuthenticated)
    }

    /// Overwrite an image at `path` and return its public URL
    async fn upload_image(&self, bucket: &str, path: &str, image: &MediaUpload) -> AppResult<String> {
        if !image.is_image() {
            return Err(AppError::Validation(format!(
                "{} no es una imagen.",
                image.file_name
            )));
        }

        self.storage
            .upload(bucket, path, image, true)
            .await
            .map_err(|e| AppError::Upload {
                file_name: image.file_name.clone(),
                message: e.to_string(),
            })?;

        Ok(self.storage.public_url(bucket, path))
    }
}
