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

//! Auth provider user, session and derived app user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Profile;

/// A user as returned by the auth provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// Free-form metadata set at sign-up and by profile updates
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl AuthUser {
    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Name from metadata, falling back to the e-mail address
    pub fn display_name(&self) -> String {
        self.metadata_str("name")
            .or(self.email.as_deref())
            .unwrap_or_default()
            .to_string()
    }

    pub fn location(&self) -> String {
        self.metadata_str("location").unwrap_or_default().to_string()
    }

    pub fn is_verified(&self) -> bool {
        self.user_metadata
            .get("isVerified")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

/// Tokens issued by the auth provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub access_token: String,

    pub refresh_token: String,

    /// Absolute expiry, when the provider reported one
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    pub user: AuthUser,
}

/// Result of a sign-up call; no session until the e-mail is confirmed
/// when the project requires confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpOutcome {
    pub user: Option<AuthUser>,
    pub session: Option<AuthSession>,
}

/// Sign-up form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub location: String,
}

/// Sign-in form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// The signed-in user as the rest of the app sees it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppUser {
    pub id: String,
    pub email: Option<String>,
    pub name: String,
    pub location: String,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub is_verified: bool,
    pub is_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl AppUser {
    /// Derive from auth metadata only
    pub fn from_auth_user(user: &AuthUser) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.display_name(),
            location: user.location(),
            avatar_url: None,
            banner_url: None,
            is_verified: user.is_verified(),
            is_confirmed: user.is_confirmed(),
            created_at: user.created_at,
        }
    }

    /// Overlay the stored profile row, which profile edits write to
    pub fn with_profile(mut self, profile: &Profile) -> Self {
        if !profile.name.trim().is_empty() {
            self.name = profile.name.clone();
        }
        if !profile.location.trim().is_empty() {
            self.location = profile.location.clone();
        }
        self.avatar_url = profile.avatar_url.clone();
        self.banner_url = profile.banner_url.clone();
        self.is_verified = self.is_verified || profile.is_verified;
        self
    }
}

/// Auth lifecycle notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn { user: AppUser },
    SignedOut,
    UserUpdated { user: AppUser },
}

/// What pressing "Crear" leads to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreateAccess {
    /// No session: open the sign-in form
    SignIn,
    /// Signed in but not verified: open the profile menu to verify
    Verify,
    /// Verified: open the create options
    Allowed,
}
