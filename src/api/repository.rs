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

//! Typed access to the four record types: profiles, posts, follow edges, media

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::converter::{convert_post_row, convert_profile_row};
use super::query::{Filter, Query};
use super::Backend;
use crate::error::{AppError, AppResult};
use crate::models::{FollowEdge, Post, PostType, Profile};

/// Table and column names
pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const POSTS: &str = "items";
    pub const FOLLOWERS: &str = "followers";

    /// Posts joined with their owner's profile
    pub const POST_WITH_PROFILE: &str = "*, profiles(*)";
}

/// Thin typed layer over a [`Backend`]
#[derive(Clone)]
pub struct MarketplaceRepository {
    backend: Arc<dyn Backend>,
}

impl MarketplaceRepository {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Feed query: newest first, optional text term and category
    pub fn posts_query(term: &str, filter: Option<PostType>) -> Query {
        let mut query = Query::from(tables::POSTS)
            .select(tables::POST_WITH_PROFILE)
            .order("createdAt", false);

        // Blank terms mean no filter; any other term is matched exactly as typed
        if !term.trim().is_empty() {
            query = query.or(vec![
                Filter::contains("description", term),
                Filter::contains("jobTitle", term),
            ]);
        }

        if let Some(post_type) = filter {
            query = query.eq("postType", post_type.as_str());
        }

        query
    }

    /// People search: alphabetical, optional name term
    pub fn profiles_query(term: &str) -> Query {
        let mut query = Query::from(tables::PROFILES).order("name", true);

        if !term.trim().is_empty() {
            query.filters.push(Filter::contains("name", term));
        }

        query
    }

    pub async fn search_posts(&self, term: &str, filter: Option<PostType>) -> AppResult<Vec<Post>> {
        let rows = self.backend.select(&Self::posts_query(term, filter)).await?;
        Ok(convert_posts(&rows))
    }

    pub async fn search_profiles(&self, term: &str) -> AppResult<Vec<Profile>> {
        let rows = self.backend.select(&Self::profiles_query(term)).await?;
        Ok(rows
            .iter()
            .filter_map(|row| match convert_profile_row(row) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!("Skipping malformed profile row: {}", e);
                    None
                }
            })
            .collect())
    }

    /// A single profile; `NotFound` when absent
    pub async fn get_profile(&self, profile_id: &str) -> AppResult<Profile> {
        let row = self
            .backend
            .select_single(&Query::from(tables::PROFILES).eq("id", profile_id))
            .await?;
        convert_profile_row(&row)
    }

    /// A single profile, or `None` when absent
    pub async fn find_profile(&self, profile_id: &str) -> AppResult<Option<Profile>> {
        let row = self
            .backend
            .select_maybe_single(&Query::from(tables::PROFILES).eq("id", profile_id))
            .await?;
        row.as_ref().map(convert_profile_row).transpose()
    }

    /// A user's listings, newest first
    pub async fn posts_by_user(&self, user_id: &str) -> AppResult<Vec<Post>> {
        let query = Query::from(tables::POSTS)
            .select(tables::POST_WITH_PROFILE)
            .eq("userId", user_id)
            .order("createdAt", false);
        let rows = self.backend.select(&query).await?;
        Ok(convert_posts(&rows))
    }

    /// Insert a listing row and return it joined with its profile
    pub async fn insert_post(&self, row: Value) -> AppResult<Post> {
        let rows = self
            .backend
            .insert(tables::POSTS, row, tables::POST_WITH_PROFILE)
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| AppError::Api {
                status: 500,
                message: "Error al publicar.".to_string(),
            })?;
        convert_post_row(row)
    }

    pub async fn update_profile(&self, profile_id: &str, changes: Value) -> AppResult<Option<Profile>> {
        let rows = self
            .backend
            .update(&Query::from(tables::PROFILES).eq("id", profile_id), changes)
            .await?;
        rows.first().map(convert_profile_row).transpose()
    }

    /// Number of profiles following `profile_id`
    pub async fn count_followers(&self, profile_id: &str) -> AppResult<u64> {
        self.backend
            .count(&Query::from(tables::FOLLOWERS).eq("following_id", profile_id))
            .await
    }

    /// Number of profiles `profile_id` follows
    pub async fn count_following(&self, profile_id: &str) -> AppResult<u64> {
        self.backend
            .count(&Query::from(tables::FOLLOWERS).eq("follower_id", profile_id))
            .await
    }

    fn edge_query(edge: &FollowEdge) -> Query {
        Query::from(tables::FOLLOWERS)
            .eq("follower_id", edge.follower_id.as_str())
            .eq("following_id", edge.following_id.as_str())
    }

    pub async fn follow_exists(&self, edge: &FollowEdge) -> AppResult<bool> {
        let row = self.backend.select_maybe_single(&Self::edge_query(edge)).await?;
        Ok(row.is_some())
    }

    pub async fn insert_follow(&self, edge: &FollowEdge) -> AppResult<()> {
        debug!("Inserting follow edge {} -> {}", edge.follower_id, edge.following_id);
        self.backend
            .insert(
                tables::FOLLOWERS,
                json!({ "follower_id": edge.follower_id, "following_id": edge.following_id }),
                "*",
            )
            .await?;
        Ok(())
    }

    pub async fn delete_follow(&self, edge: &FollowEdge) -> AppResult<()> {
        debug!("Deleting follow edge {} -> {}", edge.follower_id, edge.following_id);
        self.backend.delete(&Self::edge_query(edge)).await
    }
}

fn convert_posts(rows: &[Value]) -> Vec<Post> {
    rows.iter()
        .filter_map(|row| match convert_post_row(row) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!("Skipping malformed post row: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryBackend;

    fn seeded() -> (Arc<MemoryBackend>, MarketplaceRepository) {
        let backend = Arc::new(MemoryBackend::marketplace());
        backend.insert_row(
            tables::PROFILES,
            json!({"id": "u1", "name": "Ana", "location": "Centro", "is_verified": false,
                   "created_at": "2025-01-01T00:00:00Z"}),
        );
        backend.insert_row(
            tables::POSTS,
            json!({"id": "p1", "postType": "item", "description": "Bicicleta roja", "contactInfo": "1",
                   "mediaUrls": [], "userId": "u1", "createdAt": "2025-01-02T00:00:00Z", "price": 900}),
        );
        backend.insert_row(
            tables::POSTS,
            json!({"id": "p2", "postType": "job", "description": "Turno noche", "contactInfo": "1",
                   "jobTitle": "Velador", "mediaUrls": [], "userId": "u1",
                   "createdAt": "2025-01-03T00:00:00Z"}),
        );
        let repo = MarketplaceRepository::new(backend.clone());
        (backend, repo)
    }

    #[test]
    fn blank_term_adds_no_text_filter() {
        let query = MarketplaceRepository::posts_query("   ", Some(PostType::Rental));
        assert_eq!(query.filters, vec![Filter::eq("postType", "rental")]);
    }

    #[test]
    fn term_is_matched_as_typed() {
        let query = MarketplaceRepository::posts_query(" bici", None);
        assert_eq!(
            query.filters,
            vec![Filter::Or(vec![
                Filter::contains("description", " bici"),
                Filter::contains("jobTitle", " bici"),
            ])]
        );

        let query = MarketplaceRepository::profiles_query("Ana ");
        assert_eq!(query.filters, vec![Filter::contains("name", "Ana ")]);
    }

    #[tokio::test]
    async fn posts_by_user_are_newest_first_and_joined() {
        let (_, repo) = seeded();
        let posts = repo.posts_by_user("u1").await.unwrap();
        assert_eq!(posts.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["p2", "p1"]);
        assert!(posts.iter().all(|p| p.profile.is_some()));
    }

    #[tokio::test]
    async fn search_matches_job_title() {
        let (_, repo) = seeded();
        let posts = repo.search_posts("velador", None).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "p2");
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let (_, repo) = seeded();
        assert!(matches!(repo.get_profile("nobody").await, Err(AppError::NotFound(_))));
        assert!(repo.find_profile("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn follow_edges_round_trip_through_counts() {
        let (_, repo) = seeded();
        let edge = FollowEdge::new("u2", "u1");

        assert!(!repo.follow_exists(&edge).await.unwrap());
        repo.insert_follow(&edge).await.unwrap();
        assert!(repo.follow_exists(&edge).await.unwrap());
        assert_eq!(repo.count_followers("u1").await.unwrap(), 1);
        assert_eq!(repo.count_following("u2").await.unwrap(), 1);

        repo.delete_follow(&edge).await.unwrap();
        assert_eq!(repo.count_followers("u1").await.unwrap(), 0);
    }
}
