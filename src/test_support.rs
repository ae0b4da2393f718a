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

//! Shared fixtures for controller tests

use std::sync::Arc;

use crate::api::memory::MemoryBackend;
use crate::api::MarketplaceRepository;
use crate::models::{AppUser, AuthUser, SignInRequest};
use crate::session::SessionContext;

pub const PASSWORD: &str = "secreto123";

/// A memory backend with a session context wired to it
pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub repository: MarketplaceRepository,
    pub session: Arc<SessionContext>,
}

impl Fixture {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::marketplace());
        let repository = MarketplaceRepository::new(backend.clone());
        let session = Arc::new(SessionContext::new(backend.clone(), repository.clone(), None));
        Self {
            backend,
            repository,
            session,
        }
    }

    /// Register a user with a profile row
    pub fn user(&self, email: &str, name: &str) -> AuthUser {
        self.backend.add_user(email, PASSWORD, name)
    }

    /// Register a user and sign them in
    pub async fn signed_in(&self, email: &str, name: &str) -> AppUser {
        self.user(email, name);
        self.sign_in(email).await
    }

    pub async fn sign_in(&self, email: &str) -> AppUser {
        self.session
            .sign_in(SignInRequest {
                email: email.to_string(),
                password: PASSWORD.to_string(),
            })
            .await
            .unwrap()
    }
}
