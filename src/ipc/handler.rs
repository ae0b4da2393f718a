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

//! IPC message handler

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::{AuthProvider, Backend, DocumentAnalyzer, MarketplaceRepository, ObjectStorage};
use crate::cache::CacheManager;
use crate::config::BucketConfig;
use crate::error::{AppError, AppResult};
use crate::log_ipc;
use crate::models::{
    error_codes, methods, ContactLinks, IpcError, IpcMessage, MediaFileRequest, PostDraft,
    PostType, ProfileUpdate, SearchTarget, SignInRequest, SignUpRequest,
};
use crate::posting::PostingService;
use crate::profile::ProfileController;
use crate::search::SearchController;
use crate::session::SessionContext;
use crate::verification::VerificationService;

/// Every controller the UI can reach
pub struct AppState {
    pub session: Arc<SessionContext>,
    pub search: SearchController,
    pub profile: ProfileController,
    pub posting: PostingService,
    pub verification: Arc<VerificationService>,
    /// Local settings; `None` when the cache database could not be opened
    pub cache: Option<Arc<CacheManager>>,
}

impl AppState {
    /// Wire all controllers to one backend that also stores files and signs users in
    pub fn with_backend<B>(
        backend: Arc<B>,
        analyzer: Option<Arc<dyn DocumentAnalyzer>>,
        cache: Option<Arc<CacheManager>>,
        buckets: BucketConfig,
    ) -> Self
    where
        B: Backend + ObjectStorage + AuthProvider + 'static,
    {
        let repository = MarketplaceRepository::new(backend.clone());
        let session = Arc::new(SessionContext::new(
            backend.clone(),
            repository.clone(),
            cache.clone(),
        ));
        let verification = Arc::new(VerificationService::new(
            analyzer,
            backend.clone(),
            session.clone(),
        ));

        Self {
            search: SearchController::new(repository.clone()),
            profile: ProfileController::new(
                repository.clone(),
                backend.clone(),
                session.clone(),
                buckets.clone(),
            ),
            posting: PostingService::new(repository, backend, session.clone(), buckets.media),
            session,
            verification,
            cache,
        }
    }
}

type HandlerResult = Result<Value, IpcError>;

#[derive(Deserialize)]
struct ResendParams {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct TermParams {
    #[serde(default)]
    term: String,
}

#[derive(Deserialize)]
struct FilterParams {
    #[serde(default)]
    filter: Option<PostType>,
}

#[derive(Deserialize)]
struct TargetParams {
    target: SearchTarget,
}

#[derive(Deserialize)]
struct ProfileParams {
    profile_id: String,
}

#[derive(Deserialize)]
struct ProfileUpdateParams {
    name: String,
    location: String,
    #[serde(default)]
    avatar: Option<MediaFileRequest>,
    #[serde(default)]
    banner: Option<MediaFileRequest>,
}

#[derive(Deserialize)]
struct PostCreateParams {
    draft: PostDraft,
    #[serde(default)]
    files: Vec<MediaFileRequest>,
}

#[derive(Deserialize)]
struct ContactParams {
    contact_info: String,
}

#[derive(Deserialize)]
struct VerificationParams {
    image: MediaFileRequest,
}

/// Handles incoming IPC messages and routes them to the controllers
pub struct MessageHandler {
    state: AppState,
    shutdown_tx: broadcast::Sender<()>,
}

impl MessageHandler {
    pub fn new(state: AppState, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { state, shutdown_tx }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle an incoming IPC message
    pub async fn handle_message(&self, msg: IpcMessage) -> IpcMessage {
        let method = msg.method.as_deref().unwrap_or("unknown");
        log_ipc!(request, method, &msg.id);

        let result = match method {
            // System methods
            methods::PING => Ok(json!({
                "pong": true,
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
            methods::SHUTDOWN => self.handle_shutdown(),

            // Authentication methods
            methods::AUTH_SIGN_UP => self.handle_sign_up(&msg).await,
            methods::AUTH_SIGN_IN => self.handle_sign_in(&msg).await,
            methods::AUTH_SIGN_OUT => reply(self.state.session.sign_out().await),
            methods::AUTH_RESEND_CONFIRMATION => self.handle_resend(&msg).await,
            methods::AUTH_SESSION => self.handle_session().await,
            methods::AUTH_REFRESH => reply(self.state.session.refresh().await),

            methods::WELCOME_CHECK => self.handle_welcome_check().await,

            // Search methods
            methods::SEARCH_SET_TERM => self.handle_set_term(&msg).await,
            methods::SEARCH_SET_FILTER => self.handle_set_filter(&msg).await,
            methods::SEARCH_SET_TARGET => self.handle_set_target(&msg).await,
            methods::SEARCH_RETRY => self.search_reply(self.state.search.retry().await).await,
            methods::SEARCH_STATE => to_value(self.state.search.snapshot().await),

            // Profile methods
            methods::PROFILE_GET => self.handle_profile_get(&msg).await,
            methods::PROFILE_FOLLOW_TOGGLE => self.handle_follow_toggle(&msg).await,
            methods::PROFILE_UPDATE => self.handle_profile_update(&msg).await,

            // Post methods
            methods::POST_CREATE_ACCESS => to_value(self.state.session.create_access().await),
            methods::POST_CREATE => self.handle_post_create(&msg).await,
            methods::POST_CONTACT_LINKS => self.handle_contact_links(&msg),

            methods::VERIFICATION_SUBMIT => self.handle_verification(&msg).await,

            // Unknown method
            _ => {
                warn!("Unknown method: {}", method);
                Err(IpcError::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("Unknown method: {}", method),
                ))
            }
        };

        let response = IpcMessage::reply(&msg.id, result);

        let success = response.error.is_none();
        log_ipc!(response, method, &msg.id, success);

        response
    }

    fn handle_shutdown(&self) -> HandlerResult {
        info!("Shutdown requested via IPC");
        let _ = self.shutdown_tx.send(());
        Ok(json!({ "status": "shutting_down" }))
    }

    async fn handle_sign_up(&self, msg: &IpcMessage) -> HandlerResult {
        let request: SignUpRequest = parse_params(msg)?;
        reply(self.state.session.sign_up(request).await)
    }

    async fn handle_sign_in(&self, msg: &IpcMessage) -> HandlerResult {
        let request: SignInRequest = parse_params(msg)?;
        reply(self.state.session.sign_in(request).await)
    }

    async fn handle_resend(&self, msg: &IpcMessage) -> HandlerResult {
        let params: ResendParams = parse_params_or_default(msg)?;
        reply(
            self.state
                .session
                .resend_confirmation(params.email.as_deref())
                .await,
        )
    }

    async fn handle_session(&self) -> HandlerResult {
        let session = &self.state.session;
        Ok(json!({
            "user": session.current_user().await,
            "needs_confirmation": session.needs_email_confirmation().await,
            "create_access": session.create_access().await,
        }))
    }

    /// Whether the welcome dialog should be shown; only true on the first visit
    async fn handle_welcome_check(&self) -> HandlerResult {
        let show = match &self.state.cache {
            Some(cache) => match cache.take_welcome_flag().await {
                Ok(first_visit) => first_visit,
                Err(e) => {
                    warn!("Could not read the welcome flag: {}", e);
                    false
                }
            },
            None => false,
        };
        Ok(json!({ "show": show }))
    }

    async fn handle_set_term(&self, msg: &IpcMessage) -> HandlerResult {
        let params: TermParams = parse_params_or_default(msg)?;
        self.search_reply(self.state.search.set_term(&params.term).await)
            .await
    }

    async fn handle_set_filter(&self, msg: &IpcMessage) -> HandlerResult {
        let params: FilterParams = parse_params_or_default(msg)?;
        self.search_reply(self.state.search.set_filter(params.filter).await)
            .await
    }

    async fn handle_set_target(&self, msg: &IpcMessage) -> HandlerResult {
        let params: TargetParams = parse_params(msg)?;
        self.search_reply(self.state.search.set_target(params.target).await)
            .await
    }

    /// Search replies carry the feed as it stands after the query settled
    async fn search_reply<T>(&self, result: AppResult<T>) -> HandlerResult {
        match result {
            Ok(_) => to_value(self.state.search.snapshot().await),
            Err(e) => Err(app_error(&e)),
        }
    }

    async fn handle_profile_get(&self, msg: &IpcMessage) -> HandlerResult {
        let params: ProfileParams = parse_params(msg)?;
        let view = self
            .state
            .profile
            .load(&params.profile_id)
            .await
            .map_err(|e| app_error(&e))?;
        let can_follow = view.can_follow(self.state.session.is_signed_in().await);

        let mut value = to_value(view)?;
        value["can_follow"] = json!(can_follow);
        Ok(value)
    }

    async fn handle_follow_toggle(&self, msg: &IpcMessage) -> HandlerResult {
        let params: ProfileParams = parse_params(msg)?;
        reply(self.state.profile.toggle_follow(&params.profile_id).await)
    }

    async fn handle_profile_update(&self, msg: &IpcMessage) -> HandlerResult {
        let params: ProfileUpdateParams = parse_params(msg)?;

        let avatar = load_optional(params.avatar.as_ref())
            .await
            .map_err(|e| app_error(&e))?;
        let banner = load_optional(params.banner.as_ref())
            .await
            .map_err(|e| app_error(&e))?;

        let update = ProfileUpdate {
            name: params.name,
            location: params.location,
            avatar,
            banner,
        };
        reply(self.state.profile.update_profile(update).await)
    }

    async fn handle_post_create(&self, msg: &IpcMessage) -> HandlerResult {
        let params: PostCreateParams = parse_params(msg)?;

        let mut files = Vec::with_capacity(params.files.len());
        for file in &params.files {
            files.push(file.load().await.map_err(|e| app_error(&e))?);
        }

        let post = self
            .state
            .posting
            .create(params.draft, files)
            .await
            .map_err(|e| app_error(&e))?;

        // The feed shows the new listing without waiting for the next search
        if let Err(e) = self.state.search.retry().await {
            warn!("Feed refresh after posting failed: {}", e);
        }

        to_value(post)
    }

    fn handle_contact_links(&self, msg: &IpcMessage) -> HandlerResult {
        let params: ContactParams = parse_params(msg)?;
        to_value(ContactLinks::from_contact_info(&params.contact_info))
    }

    async fn handle_verification(&self, msg: &IpcMessage) -> HandlerResult {
        let params: VerificationParams = parse_params(msg)?;
        let image = params.image.load().await.map_err(|e| app_error(&e))?;
        reply(self.state.verification.verify(&image).await)
    }
}

async fn load_optional(
    file: Option<&MediaFileRequest>,
) -> AppResult<Option<crate::models::MediaUpload>> {
    match file {
        Some(file) => Ok(Some(file.load().await?)),
        None => Ok(None),
    }
}

fn parse_params<T: DeserializeOwned>(msg: &IpcMessage) -> Result<T, IpcError> {
    let params = msg
        .params
        .clone()
        .ok_or_else(|| IpcError::new(error_codes::INVALID_PARAMS, "Missing params"))?;

    serde_json::from_value(params).map_err(|e| {
        IpcError::new(
            error_codes::INVALID_PARAMS,
            format!("Invalid params: {}", e),
        )
    })
}

/// Like `parse_params`, but an absent params object means all defaults
fn parse_params_or_default<T: DeserializeOwned>(msg: &IpcMessage) -> Result<T, IpcError> {
    if msg.params.is_none() {
        return serde_json::from_value(json!({})).map_err(|e| {
            IpcError::new(error_codes::INVALID_PARAMS, format!("Invalid params: {}", e))
        });
    }
    parse_params(msg)
}

fn app_error(err: &AppError) -> IpcError {
    warn!("Request failed: {}", err);
    IpcError::from(err)
}

fn to_value<T: Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| app_error(&AppError::from(e)))
}

fn reply<T: Serialize>(result: AppResult<T>) -> HandlerResult {
    match result {
        Ok(value) => to_value(value),
        Err(e) => Err(app_error(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryBackend;
    use crate::api::tables;
    use crate::error::MSG_PROFILE_NOT_FOUND;
    use crate::test_support::PASSWORD;

    async fn handler() -> (Arc<MemoryBackend>, MessageHandler, broadcast::Receiver<()>) {
        let backend = Arc::new(MemoryBackend::marketplace());
        let cache = Arc::new(CacheManager::in_memory().await.unwrap());
        let state = AppState::with_backend(
            backend.clone(),
            Some(backend.clone()),
            Some(cache),
            BucketConfig::default(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        (backend, MessageHandler::new(state, shutdown_tx), shutdown_rx)
    }

    async fn call(handler: &MessageHandler, method: &str, params: Option<Value>) -> IpcMessage {
        handler.handle_message(IpcMessage::request(method, params)).await
    }

    #[tokio::test]
    async fn ping_answers_with_the_request_id() {
        let (_, handler, _) = handler().await;
        let request = IpcMessage::request(methods::PING, None);
        let response = handler.handle_message(request.clone()).await;

        assert_eq!(response.id, request.id);
        assert_eq!(response.result.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn unknown_method_and_bad_params_are_reported() {
        let (_, handler, _) = handler().await;

        let response = call(&handler, "timeline.get", None).await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        let response = call(&handler, methods::AUTH_SIGN_IN, Some(json!({"email": 1}))).await;
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);

        let response = call(&handler, methods::PROFILE_GET, None).await;
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn sign_in_updates_session_state() {
        let (backend, handler, _) = handler().await;
        backend.add_user("ana@example.com", PASSWORD, "Ana");

        let response = call(
            &handler,
            methods::AUTH_SIGN_IN,
            Some(json!({"email": "ana@example.com", "password": PASSWORD})),
        )
        .await;
        assert_eq!(response.result.unwrap()["name"], "Ana");

        let session = call(&handler, methods::AUTH_SESSION, None).await.result.unwrap();
        assert_eq!(session["user"]["name"], "Ana");
        assert_eq!(session["create_access"], "verify");

        call(&handler, methods::AUTH_SIGN_OUT, None).await;
        let session = call(&handler, methods::AUTH_SESSION, None).await.result.unwrap();
        assert!(session["user"].is_null());
        assert_eq!(session["create_access"], "sign_in");
    }

    #[tokio::test]
    async fn wrong_password_shows_static_message() {
        let (backend, handler, _) = handler().await;
        backend.add_user("ana@example.com", PASSWORD, "Ana");

        let response = call(
            &handler,
            methods::AUTH_SIGN_IN,
            Some(json!({"email": "ana@example.com", "password": "nope"})),
        )
        .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::VALIDATION_FAILED);
        assert_eq!(error.message, crate::error::MSG_INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn welcome_dialog_shows_once() {
        let (_, handler, _) = handler().await;

        let first = call(&handler, methods::WELCOME_CHECK, None).await.result.unwrap();
        let second = call(&handler, methods::WELCOME_CHECK, None).await.result.unwrap();
        assert_eq!(first["show"], true);
        assert_eq!(second["show"], false);
    }

    #[tokio::test]
    async fn search_returns_the_feed_snapshot() {
        let (backend, handler, _) = handler().await;
        backend.insert_row(
            tables::PROFILES,
            json!({"id": "u1", "name": "Zoe", "created_at": "2025-01-01T00:00:00Z"}),
        );

        let response = call(&handler, methods::SEARCH_SET_TERM, Some(json!({"term": "zo"}))).await;
        let feed = response.result.unwrap();
        assert_eq!(feed["criteria"]["term"], "zo");
        assert_eq!(feed["loading"], false);

        let response = call(
            &handler,
            methods::SEARCH_SET_TARGET,
            Some(json!({"target": "users"})),
        )
        .await;
        let feed = response.result.unwrap();
        assert_eq!(feed["applied_request"], 2);

        let response = call(
            &handler,
            methods::SEARCH_SET_FILTER,
            Some(json!({"filter": "job"})),
        )
        .await;
        assert_eq!(response.error.unwrap().code, error_codes::VALIDATION_FAILED);
    }

    #[tokio::test]
    async fn missing_profile_maps_to_not_found() {
        let (_, handler, _) = handler().await;

        let response = call(
            &handler,
            methods::PROFILE_GET,
            Some(json!({"profile_id": "nobody"})),
        )
        .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::NOT_FOUND);
        assert_eq!(error.message, MSG_PROFILE_NOT_FOUND);
    }

    #[tokio::test]
    async fn contact_links_strip_formatting() {
        let (_, handler, _) = handler().await;

        let response = call(
            &handler,
            methods::POST_CONTACT_LINKS,
            Some(json!({"contact_info": "(492) 123-4567"})),
        )
        .await;
        let links = response.result.unwrap();
        assert_eq!(links["call"], "tel:4921234567");
        assert_eq!(links["message"], "https://wa.me/4921234567");
    }

    #[tokio::test]
    async fn post_create_requires_a_session() {
        let (_, handler, _) = handler().await;

        let response = call(
            &handler,
            methods::POST_CREATE,
            Some(json!({
                "draft": {
                    "description": "Mesa",
                    "contact_info": "4921234567",
                    "post_type": "item",
                    "price": 300.0,
                    "accepts_digital_payment": false
                }
            })),
        )
        .await;
        assert_eq!(response.error.unwrap().code, error_codes::NOT_AUTHENTICATED);
    }

    #[tokio::test]
    async fn new_post_appears_in_the_feed() {
        let (backend, handler, _) = handler().await;
        let user = backend.add_user("ana@example.com", PASSWORD, "Ana");
        let mut metadata = serde_json::Map::new();
        metadata.insert("isVerified".into(), json!(true));
        AuthProvider::update_user_metadata(
            backend.as_ref(),
            &format!("token-{}", user.id),
            metadata,
        )
        .await
        .unwrap();
        call(
            &handler,
            methods::AUTH_SIGN_IN,
            Some(json!({"email": "ana@example.com", "password": PASSWORD})),
        )
        .await;

        let feed = call(&handler, methods::SEARCH_STATE, None).await.result.unwrap();
        assert_eq!(feed["results"]["items"].as_array().map(Vec::len).unwrap_or(0), 0);

        let response = call(
            &handler,
            methods::POST_CREATE,
            Some(json!({
                "draft": {
                    "description": "Mesa de pino",
                    "contact_info": "4921234567",
                    "post_type": "item",
                    "price": 300.0,
                    "accepts_digital_payment": false
                }
            })),
        )
        .await;
        let post_id = response.result.unwrap()["id"].clone();

        let feed = call(&handler, methods::SEARCH_STATE, None).await.result.unwrap();
        let items = feed["results"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], post_id);
    }

    #[tokio::test]
    async fn shutdown_signals_the_server() {
        let (_, handler, mut shutdown_rx) = handler().await;

        let response = call(&handler, methods::SHUTDOWN, None).await;
        assert_eq!(response.result.unwrap()["status"], "shutting_down");
        assert!(shutdown_rx.try_recv().is_ok());
    }
}
