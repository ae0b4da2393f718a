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

//! HTTP client for the hosted backend: REST rows, object storage and auth

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{header, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::RwLock;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::query::Query;
use super::{AuthProvider, Backend, ObjectStorage, USER_AGENT};
use crate::config::{normalize_url, Config};
use crate::error::{AppError, AppResult};
use crate::log_api_call;
use crate::models::{AuthSession, AuthUser, MediaUpload, SignUpOutcome};

/// Supabase project client
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    /// Access token of the signed-in user; rows are read anonymously without one
    access_token: RwLock<Option<String>>,
}

impl SupabaseClient {
    /// Create a client for a project URL and its public key
    pub fn new(project_url: &str, anon_key: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: normalize_url(project_url),
            anon_key: anon_key.to_string(),
            access_token: RwLock::new(None),
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(&config.supabase_url, &config.supabase_anon_key)
    }

    /// Get the project URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, endpoint)
    }

    fn storage_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            urlencoding::encode(bucket),
            encode_storage_path(path)
        )
    }

    /// Bearer for data requests: the user's token, or the anon key
    fn bearer(&self) -> String {
        self.access_token
            .read()
            .ok()
            .and_then(|token| token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: Method, url: &str, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    /// Send a request, log its timing and turn error statuses into `AppError`
    async fn send(&self, label: &str, url: &str, request: RequestBuilder) -> AppResult<Response> {
        let started = Instant::now();
        log_api_call!(start, label, url);

        let response = request.send().await.map_err(|e| {
            warn!("{} {} failed: {}", label, url, e);
            AppError::from(e)
        })?;

        let status = response.status();
        log_api_call!(done, label, url, status.as_u16(), started);

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_error_body(status.as_u16(), &body);
        debug!("{} {} returned {}: {}", label, url, status, err);
        Err(err)
    }

    async fn send_json(&self, label: &str, url: &str, request: RequestBuilder) -> AppResult<Value> {
        let response = self.send(label, url, request).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_rows(&self, label: &str, url: &str, request: RequestBuilder) -> AppResult<Vec<Value>> {
        match self.send_json(label, url, request).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            row @ Value::Object(_) => Ok(vec![row]),
            other => Err(AppError::Api {
                status: 200,
                message: format!("unexpected response body: {}", other),
            }),
        }
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> AppResult<AuthSession> {
        let url = format!("{}?grant_type={}", self.auth_url("token"), grant_type);
        let request = self
            .request(Method::POST, &url, &self.anon_key)
            .json(&body);
        let value = self.send_json("POST", &url, request).await?;
        let token: TokenResponse = serde_json::from_value(value)?;
        Ok(token.into_session(Utc::now()))
    }
}

#[async_trait]
impl Backend for SupabaseClient {
    async fn select(&self, query: &Query) -> AppResult<Vec<Value>> {
        let url = with_params(&self.rest_url(&query.table), &query.to_params());
        let request = self
            .request(Method::GET, &url, &self.bearer())
            .header(header::ACCEPT, "application/json");
        self.send_rows("GET", &url, request).await
    }

    async fn count(&self, query: &Query) -> AppResult<u64> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(query.filter_params());
        let url = with_params(&self.rest_url(&query.table), &params);

        let request = self
            .request(Method::HEAD, &url, &self.bearer())
            .header("Prefer", "count=exact");
        let response = self.send("HEAD", &url, request).await?;

        response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| AppError::Api {
                status: response.status().as_u16(),
                message: format!("missing row count for {}", query.table),
            })
    }

    async fn insert(&self, table: &str, row: Value, select: &str) -> AppResult<Vec<Value>> {
        let params = vec![("select".to_string(), select.split_whitespace().collect::<String>())];
        let url = with_params(&self.rest_url(table), &params);
        let request = self
            .request(Method::POST, &url, &self.bearer())
            .header("Prefer", "return=representation")
            .json(&row);
        self.send_rows("POST", &url, request).await
    }

    async fn update(&self, query: &Query, changes: Value) -> AppResult<Vec<Value>> {
        let url = with_params(&self.rest_url(&query.table), &query.filter_params());
        let request = self
            .request(Method::PATCH, &url, &self.bearer())
            .header("Prefer", "return=representation")
            .json(&changes);
        self.send_rows("PATCH", &url, request).await
    }

    async fn delete(&self, query: &Query) -> AppResult<()> {
        let url = with_params(&self.rest_url(&query.table), &query.filter_params());
        let request = self.request(Method::DELETE, &url, &self.bearer());
        self.send("DELETE", &url, request).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for SupabaseClient {
    async fn upload(&self, bucket: &str, path: &str, file: &MediaUpload, upsert: bool) -> AppResult<()> {
        let url = self.storage_url(bucket, path);
        let request = self
            .request(Method::POST, &url, &self.bearer())
            .header(header::CONTENT_TYPE, &file.content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(file.bytes.clone());
        self.send("POST", &url, request).await?;

        info!("Uploaded {} ({} bytes) to {}", file.file_name, file.bytes.len(), bucket);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            urlencoding::encode(bucket),
            encode_storage_path(path)
        )
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> AppResult<SignUpOutcome> {
        let url = self.auth_url("signup");
        let request = self
            .request(Method::POST, &url, &self.anon_key)
            .json(&json!({ "email": email, "password": password, "data": metadata }));
        let value = self.send_json("POST", &url, request).await?;
        parse_sign_up(value, Utc::now())
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        self.token_grant("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn sign_out(&self, access_token: &str) -> AppResult<()> {
        let url = self.auth_url("logout");
        let request = self.request(Method::POST, &url, access_token);
        self.send("POST", &url, request).await?;
        Ok(())
    }

    async fn resend_confirmation(&self, email: &str) -> AppResult<()> {
        let url = self.auth_url("resend");
        let request = self
            .request(Method::POST, &url, &self.anon_key)
            .json(&json!({ "type": "signup", "email": email }));
        self.send("POST", &url, request).await?;
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> AppResult<AuthUser> {
        let url = self.auth_url("user");
        let request = self.request(Method::GET, &url, access_token);
        let value = self.send_json("GET", &url, request).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn update_user_metadata(
        &self,
        access_token: &str,
        metadata: Map<String, Value>,
    ) -> AppResult<AuthUser> {
        let url = self.auth_url("user");
        let request = self
            .request(Method::PUT, &url, access_token)
            .json(&json!({ "data": metadata }));
        let value = self.send_json("PUT", &url, request).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<AuthSession> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    fn use_session_token(&self, access_token: Option<String>) {
        match self.access_token.write() {
            Ok(mut token) => *token = access_token,
            Err(_) => warn!("Access token lock poisoned; keeping previous token"),
        }
    }
}

/// Token endpoint payload
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Unix seconds
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> AuthSession {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| now + ChronoDuration::seconds(secs)));

        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Sign-up answers with a session, or with the bare user while the e-mail
/// still needs confirming
fn parse_sign_up(value: Value, now: DateTime<Utc>) -> AppResult<SignUpOutcome> {
    if value.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(value)?;
        let session = token.into_session(now);
        return Ok(SignUpOutcome {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }

    let user = match value.get("user") {
        Some(user) if user.is_object() => serde_json::from_value(user.clone())?,
        _ => serde_json::from_value(value)?,
    };

    Ok(SignUpOutcome {
        user: Some(user),
        session: None,
    })
}

/// Turn an error body from any of the three services into an `AppError`
fn classify_error_body(status: u16, body: &str) -> AppError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let code = match parsed.get("code").or_else(|| parsed.get("error_code")) {
        Some(Value::String(code)) => Some(code.clone()),
        _ => None,
    };

    let message = ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| parsed.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());

    AppError::from_backend(status, code.as_deref(), &message)
}

/// Rows total from a `Content-Range` header (`0-9/42`, `*/0`)
fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// Percent-encode each segment of a storage path, keeping the separators
fn encode_storage_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Append encoded query parameters to a URL
fn with_params(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }

    let query = params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", url, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_json() -> Value {
        json!({
            "id": "9b1c",
            "email": "ana@example.com",
            "email_confirmed_at": null,
            "created_at": "2025-03-01T12:00:00Z",
            "user_metadata": {"name": "Ana", "location": "Centro"}
        })
    }

    #[test]
    fn counts_from_content_range() {
        assert_eq!(parse_content_range("0-9/42"), Some(42));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-9/*"), None);
    }

    #[test]
    fn storage_paths_keep_separators() {
        assert_eq!(
            encode_storage_path("u1/1700000000000-foto de mesa.jpg"),
            "u1/1700000000000-foto%20de%20mesa.jpg"
        );
    }

    #[test]
    fn public_url_points_at_public_bucket() {
        let client = SupabaseClient::new("abc.supabase.co/", "anon").unwrap();
        assert_eq!(
            client.public_url("avatars", "public/u1-avatar.png"),
            "https://abc.supabase.co/storage/v1/object/public/avatars/public/u1-avatar.png"
        );
    }

    #[test]
    fn params_are_encoded() {
        let url = with_params(
            "https://x/rest/v1/items",
            &[("description".to_string(), "ilike.%bici%".to_string())],
        );
        assert_eq!(url, "https://x/rest/v1/items?description=ilike.%25bici%25");
    }

    #[test]
    fn sign_up_without_session_needs_confirmation() {
        let outcome = parse_sign_up(user_json(), Utc::now()).unwrap();
        assert!(outcome.session.is_none());
        assert_eq!(outcome.user.map(|u| u.id), Some("9b1c".to_string()));
    }

    #[test]
    fn sign_up_with_session_carries_expiry() {
        let now = Utc::now();
        let outcome = parse_sign_up(
            json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
                "user": user_json()
            }),
            now,
        )
        .unwrap();

        let session = outcome.session.unwrap();
        assert_eq!(session.expires_at, Some(now + ChronoDuration::seconds(3600)));
        assert_eq!(session.user.display_name(), "Ana");
    }

    #[test]
    fn error_bodies_are_classified() {
        let missing = classify_error_body(
            404,
            r#"{"code":"42P01","message":"relation \"public.followers\" does not exist"}"#,
        );
        assert!(matches!(missing, AppError::MissingSchema(_)));

        let rls = classify_error_body(
            403,
            r#"{"code":"42501","message":"new row violates row-level security policy"}"#,
        );
        assert!(matches!(rls, AppError::Permission(_)));

        let auth = classify_error_body(400, r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#);
        match auth {
            AppError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid login credentials");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let plain = classify_error_body(502, "Bad Gateway");
        assert!(matches!(plain, AppError::Api { status: 502, .. }));
    }
}
