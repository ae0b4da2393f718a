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

//! Auth session holder
//!
//! One owned context tracks the current auth session and the app user derived
//! from it. It is populated on sign-in (or on restore at startup), refreshed on
//! demand and cleared on sign-out; every change is broadcast as an `AuthEvent`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::api::{AuthProvider, MarketplaceRepository};
use crate::cache::CacheManager;
use crate::error::{
    AppError, AppResult, MSG_ALREADY_REGISTERED, MSG_EMAIL_NOT_CONFIRMED, MSG_INVALID_CREDENTIALS,
};
use crate::log_session;
use crate::models::{
    AppUser, AuthEvent, AuthSession, AuthUser, CreateAccess, SignInRequest, SignUpRequest,
};

/// Subscribers that fall further behind than this miss events
const EVENT_CAPACITY: usize = 32;

/// Outcome of a sign-up as the UI needs it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpResult {
    /// Set when the provider opened a session right away
    pub user: Option<AppUser>,
    /// The provider is waiting for the e-mail to be confirmed
    pub needs_confirmation: bool,
}

#[derive(Clone)]
struct ActiveSession {
    session: AuthSession,
    user: AppUser,
}

pub struct SessionContext {
    auth: Arc<dyn AuthProvider>,
    repository: MarketplaceRepository,
    cache: Option<Arc<CacheManager>>,
    state: RwLock<Option<ActiveSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionContext {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        repository: MarketplaceRepository,
        cache: Option<Arc<CacheManager>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            auth,
            repository,
            cache,
            state: RwLock::new(None),
            events,
        }
    }

    /// Receive session changes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub async fn current_user(&self) -> Option<AppUser> {
        self.state.read().await.as_ref().map(|s| s.user.clone())
    }

    pub async fn is_signed_in(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// The signed-in user, or `NotAuthenticated`
    pub async fn require_user(&self) -> AppResult<AppUser> {
        self.current_user().await.ok_or(AppError::NotAuthenticated)
    }

    /// The signed-in user with the access token for user-scoped calls
    pub async fn require_token(&self) -> AppResult<(AppUser, String)> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|s| (s.user.clone(), s.session.access_token.clone()))
            .ok_or(AppError::NotAuthenticated)
    }

    /// Signed in with an e-mail address that is not confirmed yet
    pub async fn needs_email_confirmation(&self) -> bool {
        self.current_user()
            .await
            .map(|u| !u.is_confirmed)
            .unwrap_or(false)
    }

    /// Where pressing "Crear" leads
    pub async fn create_access(&self) -> CreateAccess {
        match self.current_user().await {
            None => CreateAccess::SignIn,
            Some(user) if !user.is_verified => CreateAccess::Verify,
            Some(_) => CreateAccess::Allowed,
        }
    }

    pub async fn sign_up(&self, request: SignUpRequest) -> AppResult<SignUpResult> {
        let email = request.email.trim();
        let name = request.name.trim();
        if email.is_empty() || request.password.is_empty() || name.is_empty() {
            return Err(AppError::Validation(
                "Nombre, correo y contraseña son obligatorios.".to_string(),
            ));
        }

        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(name));
        metadata.insert("location".into(), json!(request.location.trim()));

        let outcome = self
            .auth
            .sign_up(email, &request.password, metadata)
            .await
            .map_err(|e| match e {
                AppError::Api { status: 422, message } => {
                    warn!("Sign-up rejected: {}", message);
                    AppError::Validation(MSG_ALREADY_REGISTERED.to_string())
                }
                other => other,
            })?;

        match outcome.session {
            Some(session) => {
                let user = self.establish(session).await;
                Ok(SignUpResult {
                    user: Some(user),
                    needs_confirmation: false,
                })
            }
            None => {
                info!("Sign-up for {} awaits e-mail confirmation", email);
                Ok(SignUpResult {
                    user: None,
                    needs_confirmation: true,
                })
            }
        }
    }

    pub async fn sign_in(&self, request: SignInRequest) -> AppResult<AppUser> {
        let email = request.email.trim();
        if email.is_empty() || request.password.is_empty() {
            return Err(AppError::Validation(
                "Correo y contraseña son obligatorios.".to_string(),
            ));
        }

        let session = self
            .auth
            .sign_in(email, &request.password)
            .await
            .map_err(rejected_sign_in)?;
        Ok(self.establish(session).await)
    }

    /// End the session locally even when the provider call fails
    pub async fn sign_out(&self) -> AppResult<()> {
        let Some(active) = self.state.write().await.take() else {
            return Ok(());
        };

        if let Err(e) = self.auth.sign_out(&active.session.access_token).await {
            warn!("Provider sign-out failed, clearing local session anyway: {}", e);
        }

        self.auth.use_session_token(None);
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear_session().await {
                warn!("Failed to clear persisted session: {}", e);
            }
        }

        log_session!(signed_out);
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    /// Send the confirmation e-mail again, to `email` or the signed-in user
    pub async fn resend_confirmation(&self, email: Option<&str>) -> AppResult<()> {
        let email = match email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) => email.to_string(),
            None => self
                .current_user()
                .await
                .and_then(|u| u.email)
                .ok_or_else(|| AppError::Validation("No hay un correo para confirmar.".to_string()))?,
        };

        self.auth.resend_confirmation(&email).await?;
        info!("Confirmation e-mail resent to {}", email);
        Ok(())
    }

    /// Re-read the user and their profile row; `None` when signed out
    pub async fn refresh(&self) -> AppResult<Option<AppUser>> {
        let Some(token) = self
            .state
            .read()
            .await
            .as_ref()
            .map(|s| s.session.access_token.clone())
        else {
            return Ok(None);
        };

        let auth_user = self.auth.get_user(&token).await?;
        let user = self.derive_user(&auth_user).await;

        {
            let mut state = self.state.write().await;
            match state.as_mut() {
                // Signed out while the refresh was running
                None => return Ok(None),
                Some(active) => {
                    active.session.user = auth_user;
                    active.user = user.clone();
                }
            }
        }

        log_session!(updated, user.id.as_str());
        let _ = self.events.send(AuthEvent::UserUpdated { user: user.clone() });
        Ok(Some(user))
    }

    /// Resume the session persisted by an earlier run
    pub async fn restore(&self) -> AppResult<Option<AppUser>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let Some(saved) = cache.load_session().await? else {
            return Ok(None);
        };

        match self.auth.refresh(&saved.refresh_token).await {
            Ok(session) => Ok(Some(self.establish(session).await)),
            Err(e) => {
                warn!("Persisted session could not be restored: {}", e);
                cache.clear_session().await?;
                Ok(None)
            }
        }
    }

    async fn derive_user(&self, auth_user: &AuthUser) -> AppUser {
        let user = AppUser::from_auth_user(auth_user);
        match self.repository.find_profile(&auth_user.id).await {
            Ok(Some(profile)) => user.with_profile(&profile),
            Ok(None) => user,
            Err(e) => {
                warn!("Profile row for {} unavailable: {}", auth_user.id, e);
                user
            }
        }
    }

    async fn establish(&self, session: AuthSession) -> AppUser {
        self.auth.use_session_token(Some(session.access_token.clone()));
        let user = self.derive_user(&session.user).await;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save_session(&session).await {
                warn!("Failed to persist session: {}", e);
            }
        }

        *self.state.write().await = Some(ActiveSession {
            session,
            user: user.clone(),
        });

        log_session!(signed_in, user.id.as_str());
        let _ = self.events.send(AuthEvent::SignedIn { user: user.clone() });
        user
    }
}

/// Provider rejections of a sign-in become static messages; other failures pass through
fn rejected_sign_in(err: AppError) -> AppError {
    match err {
        AppError::Api { status: 400, message } => {
            warn!("Sign-in rejected: {}", message);
            if message.contains("not confirmed") {
                AppError::Validation(MSG_EMAIL_NOT_CONFIRMED.to_string())
            } else {
                AppError::Validation(MSG_INVALID_CREDENTIALS.to_string())
            }
        }
        other => other,
    }
}
