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

//! Profile model: the public identity record of an authenticated user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A marketplace profile (row of the `profiles` table)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    /// Same identifier as the auth provider's user id
    pub id: String,

    /// Display name
    pub name: String,

    /// Free-text neighbourhood or town
    #[serde(default)]
    pub location: String,

    /// Public URL of the avatar image
    #[serde(default)]
    pub avatar_url: Option<String>,

    /// Public URL of the banner image
    #[serde(default)]
    pub banner_url: Option<String>,

    /// Whether the identity document check succeeded
    #[serde(default)]
    pub is_verified: bool,

    /// When the profile was created
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// First word of the name, used for headings like "Publicaciones de Ana"
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }
}

/// Changes submitted from the profile editor
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub name: String,
    pub location: String,
    /// New avatar image, if the user picked one
    pub avatar: Option<super::MediaUpload>,
    /// New banner image, if the user picked one
    pub banner: Option<super::MediaUpload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_name_handles_extra_whitespace() {
        let profile = Profile {
            id: "u1".into(),
            name: "  Ana   María López ".into(),
            location: String::new(),
            avatar_url: None,
            banner_url: None,
            is_verified: false,
            created_at: Utc::now(),
        };
        assert_eq!(profile.first_name(), "Ana");
    }

    #[test]
    fn missing_optional_columns_default() {
        let profile: Profile = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "name": "Luis",
            "created_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(!profile.is_verified);
        assert!(profile.avatar_url.is_none());
        assert_eq!(profile.location, "");
    }
}
