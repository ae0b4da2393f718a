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

//! Follow edges and profile page state

use serde::{Deserialize, Serialize};

use super::{Post, Profile};

/// Directed relation: `follower_id` follows `following_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FollowEdge {
    pub follower_id: String,
    pub following_id: String,
}

impl FollowEdge {
    pub fn new(follower_id: impl Into<String>, following_id: impl Into<String>) -> Self {
        Self {
            follower_id: follower_id.into(),
            following_id: following_id.into(),
        }
    }
}

/// Follower / following counts for one profile
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FollowStats {
    pub followers: u64,
    pub following: u64,
}

/// Everything the profile page shows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileView {
    pub profile: Profile,

    /// The profile's listings, newest first
    pub posts: Vec<Post>,

    pub stats: FollowStats,

    /// Whether the viewer follows this profile (false when signed out)
    pub is_following: bool,

    /// Whether the viewer is looking at their own profile
    pub is_own_profile: bool,
}

impl ProfileView {
    /// The follow button is only offered to signed-in viewers on other profiles
    pub fn can_follow(&self, viewer_signed_in: bool) -> bool {
        viewer_signed_in && !self.is_own_profile
    }
}

/// Result of a follow toggle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowToggle {
    pub is_following: bool,
    pub followers: u64,
    /// False when the count could not be re-read and was adjusted locally
    pub reconciled: bool,
}
