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

//! In-memory stand-in for every backend trait, used by tests
//!
//! Rows are JSON values evaluated with the same `Query` the HTTP client
//! renders, so controller tests exercise real filter and join semantics.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::query::{ilike_matches, Filter, Query};
use super::repository::tables;
use super::{AuthProvider, Backend, DocumentAnalyzer, ObjectStorage};
use crate::error::{AppError, AppResult};
use crate::models::{AuthSession, AuthUser, DocumentAnalysis, MediaUpload, SignUpOutcome};

/// A scripted backend failure
#[derive(Debug, Clone)]
pub enum Failure {
    Network,
    MissingSchema,
    Permission,
    Api(u16),
}

impl Failure {
    fn to_error(&self, table: &str) -> AppError {
        match self {
            Failure::Network => AppError::Network("connection reset".to_string()),
            Failure::MissingSchema => {
                AppError::from_backend(404, Some("42P01"), &format!("relation \"public.{}\" does not exist", table))
            }
            Failure::Permission => AppError::from_backend(
                403,
                Some("42501"),
                &format!("new row violates row-level security policy for table \"{}\"", table),
            ),
            Failure::Api(status) => AppError::Api {
                status: *status,
                message: format!("{} failed", table),
            },
        }
    }
}

struct StoredUser {
    password: String,
    user: AuthUser,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Value>>,
    /// table -> (embedded table, local column holding the embedded row's id)
    relations: HashMap<String, Vec<(String, String)>>,
    next_id: u64,

    read_failures: HashMap<String, Failure>,
    write_failures: HashMap<String, Failure>,
    count_failures: HashMap<String, Failure>,
    write_gate: Option<Arc<Notify>>,

    upload_failures: HashMap<String, String>,
    uploads: Vec<String>,

    users: HashMap<String, StoredUser>,
    require_confirmation: bool,
    resends: Vec<String>,
    session_token: Option<String>,

    analysis: Option<Result<DocumentAnalysis, String>>,
    analysis_calls: usize,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with the marketplace join `items.userId -> profiles.id`
    pub fn marketplace() -> Self {
        let backend = Self::new();
        backend.register_relation(tables::POSTS, tables::PROFILES, "userId");
        backend
    }

    pub fn register_relation(&self, table: &str, embedded: &str, local_column: &str) {
        self.state
            .lock()
            .unwrap()
            .relations
            .entry(table.to_string())
            .or_default()
            .push((embedded.to_string(), local_column.to_string()));
    }

    /// Insert a fixture row directly, bypassing scripted failures
    pub fn insert_row(&self, table: &str, row: Value) -> Value {
        let mut state = self.state.lock().unwrap();
        state.store(table, row)
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_reads(&self, table: &str, failure: Failure) {
        self.state.lock().unwrap().read_failures.insert(table.to_string(), failure);
    }

    pub fn fail_writes(&self, table: &str, failure: Failure) {
        self.state.lock().unwrap().write_failures.insert(table.to_string(), failure);
    }

    pub fn fail_counts(&self, table: &str, failure: Failure) {
        self.state.lock().unwrap().count_failures.insert(table.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.read_failures.clear();
        state.write_failures.clear();
        state.count_failures.clear();
    }

    /// Park every write until the returned handle is notified
    pub fn hold_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().write_gate = Some(gate.clone());
        gate
    }

    pub fn release_writes(&self) {
        if let Some(gate) = self.state.lock().unwrap().write_gate.take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    /// Uploads of `file_name` fail with `message`
    pub fn fail_upload(&self, file_name: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .upload_failures
            .insert(file_name.to_string(), message.to_string());
    }

    /// `bucket/path` of every stored object, in upload order
    pub fn uploaded_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// Sign-ups leave the e-mail unconfirmed and return no session
    pub fn require_confirmation(&self, required: bool) {
        self.state.lock().unwrap().require_confirmation = required;
    }

    /// E-mails a confirmation was resent to
    pub fn resends(&self) -> Vec<String> {
        self.state.lock().unwrap().resends.clone()
    }

    /// Register a confirmed user with a profile row
    pub fn add_user(&self, email: &str, password: &str, name: &str) -> AuthUser {
        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(name));
        metadata.insert("location".into(), json!("Centro"));
        let mut state = self.state.lock().unwrap();
        state.create_user(email, password, metadata, true)
    }

    /// Token data requests currently run under
    pub fn session_token(&self) -> Option<String> {
        self.state.lock().unwrap().session_token.clone()
    }

    pub fn set_analysis(&self, result: Result<DocumentAnalysis, String>) {
        self.state.lock().unwrap().analysis = Some(result);
    }

    pub fn analysis_calls(&self) -> usize {
        self.state.lock().unwrap().analysis_calls
    }

    async fn wait_for_gate(&self) {
        let gate = self.state.lock().unwrap().write_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

impl State {
    fn store(&mut self, table: &str, mut row: Value) -> Value {
        if let Value::Object(map) = &mut row {
            if !map.contains_key("id") {
                self.next_id += 1;
                map.insert("id".into(), json!(format!("{}-{}", table, self.next_id)));
            }
        }
        self.tables.entry(table.to_string()).or_default().push(row.clone());
        row
    }

    fn embed(&self, table: &str, select: &str, mut row: Value) -> Value {
        let query = Query::from(table).select(select);
        let relations = self.relations.get(table);

        for name in query.embedded() {
            let Some((_, local)) = relations.and_then(|r| r.iter().find(|(e, _)| e == name)) else {
                continue;
            };
            let key = row.get(local.as_str()).cloned().unwrap_or(Value::Null);
            let joined = self
                .tables
                .get(name)
                .and_then(|rows| rows.iter().find(|r| r.get("id") == Some(&key)))
                .cloned()
                .unwrap_or(Value::Null);
            if let Value::Object(map) = &mut row {
                map.insert(name.to_string(), joined);
            }
        }
        row
    }

    fn matching(&self, query: &Query) -> Vec<Value> {
        self.tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn create_user(
        &mut self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
        confirmed: bool,
    ) -> AuthUser {
        let now = Utc::now();
        let user = AuthUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            email_confirmed_at: confirmed.then_some(now),
            created_at: now,
            user_metadata: metadata.clone(),
        };

        // Mirrors the profile-creation trigger on the auth users table
        self.store(
            tables::PROFILES,
            json!({
                "id": user.id,
                "name": metadata.get("name").cloned().unwrap_or(json!("")),
                "location": metadata.get("location").cloned().unwrap_or(json!("")),
                "avatar_url": null,
                "banner_url": null,
                "is_verified": false,
                "created_at": now.to_rfc3339(),
            }),
        );

        self.users.insert(
            email.to_string(),
            StoredUser {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    fn user_by_id(&mut self, id: &str) -> Option<&mut StoredUser> {
        self.users.values_mut().find(|u| u.user.id == id)
    }
}

fn session_for(user: &AuthUser) -> AuthSession {
    AuthSession {
        access_token: format!("token-{}", user.id),
        refresh_token: format!("refresh-{}", user.id),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        user: user.clone(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, expected) => row
            .get(column.as_str())
            .map(|actual| actual == expected || value_text(actual) == value_text(expected))
            .unwrap_or(false),
        Filter::ILike(column, pattern) => row
            .get(column.as_str())
            .and_then(Value::as_str)
            .map(|text| ilike_matches(pattern, text))
            .unwrap_or(false),
        Filter::Or(filters) => filters.iter().any(|f| matches(row, f)),
    }
}

/// Nulls sort last in either direction
fn compare(a: Option<&Value>, b: Option<&Value>, ascending: bool) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    let ordering = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
    };
    if ascending {
        ordering
    } else {
        ordering.reverse()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, query: &Query) -> AppResult<Vec<Value>> {
        let state = self.state.lock().unwrap();
        if let Some(failure) = state.read_failures.get(&query.table) {
            return Err(failure.to_error(&query.table));
        }

        let mut rows = state.matching(query);
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                compare(
                    a.get(order.column.as_str()),
                    b.get(order.column.as_str()),
                    order.ascending,
                )
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }

        Ok(rows
            .into_iter()
            .map(|row| state.embed(&query.table, &query.select, row))
            .collect())
    }

    async fn count(&self, query: &Query) -> AppResult<u64> {
        let state = self.state.lock().unwrap();
        if let Some(failure) = state.count_failures.get(&query.table) {
            return Err(failure.to_error(&query.table));
        }
        Ok(state.matching(query).len() as u64)
    }

    async fn insert(&self, table: &str, row: Value, select: &str) -> AppResult<Vec<Value>> {
        self.wait_for_gate().await;
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.write_failures.get(table) {
            return Err(failure.to_error(table));
        }
        let stored = state.store(table, row);
        Ok(vec![state.embed(table, select, stored)])
    }

    async fn update(&self, query: &Query, changes: Value) -> AppResult<Vec<Value>> {
        self.wait_for_gate().await;
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.write_failures.get(&query.table) {
            return Err(failure.to_error(&query.table));
        }

        let changes = changes.as_object().cloned().unwrap_or_default();
        let mut updated = Vec::new();
        if let Some(rows) = state.tables.get_mut(&query.table) {
            for row in rows.iter_mut() {
                if !query.filters.iter().all(|f| matches(row, f)) {
                    continue;
                }
                if let Value::Object(map) = row {
                    for (key, value) in &changes {
                        map.insert(key.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> AppResult<()> {
        self.wait_for_gate().await;
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state.write_failures.get(&query.table) {
            return Err(failure.to_error(&query.table));
        }
        if let Some(rows) = state.tables.get_mut(&query.table) {
            rows.retain(|row| !query.filters.iter().all(|f| matches(row, f)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for MemoryBackend {
    async fn upload(&self, bucket: &str, path: &str, file: &MediaUpload, upsert: bool) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.upload_failures.get(&file.file_name) {
            return Err(AppError::Api {
                status: 400,
                message: message.clone(),
            });
        }

        let key = format!("{}/{}", bucket, path);
        if state.uploads.contains(&key) {
            if !upsert {
                return Err(AppError::Api {
                    status: 409,
                    message: "The resource already exists".to_string(),
                });
            }
        } else {
            state.uploads.push(key);
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> AppResult<SignUpOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(email) {
            return Err(AppError::Api {
                status: 422,
                message: "User already registered".to_string(),
            });
        }

        let confirmed = !state.require_confirmation;
        let user = state.create_user(email, password, metadata, confirmed);
        Ok(SignUpOutcome {
            session: confirmed.then(|| session_for(&user)),
            user: Some(user),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let state = self.state.lock().unwrap();
        let stored = state
            .users
            .get(email)
            .filter(|u| u.password == password)
            .ok_or_else(|| AppError::Api {
                status: 400,
                message: "Invalid login credentials".to_string(),
            })?;

        if !stored.user.is_confirmed() {
            return Err(AppError::Api {
                status: 400,
                message: "Email not confirmed".to_string(),
            });
        }
        Ok(session_for(&stored.user))
    }

    async fn sign_out(&self, _access_token: &str) -> AppResult<()> {
        Ok(())
    }

    async fn resend_confirmation(&self, email: &str) -> AppResult<()> {
        self.state.lock().unwrap().resends.push(email.to_string());
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> AppResult<AuthUser> {
        let mut state = self.state.lock().unwrap();
        let id = access_token.strip_prefix("token-").unwrap_or_default();
        state
            .user_by_id(id)
            .map(|u| u.user.clone())
            .ok_or(AppError::NotAuthenticated)
    }

    async fn update_user_metadata(
        &self,
        access_token: &str,
        metadata: Map<String, Value>,
    ) -> AppResult<AuthUser> {
        let mut state = self.state.lock().unwrap();
        let id = access_token.strip_prefix("token-").unwrap_or_default();
        let stored = state.user_by_id(id).ok_or(AppError::NotAuthenticated)?;
        stored.user.user_metadata.extend(metadata);
        Ok(stored.user.clone())
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<AuthSession> {
        let mut state = self.state.lock().unwrap();
        let id = refresh_token.strip_prefix("refresh-").unwrap_or_default();
        state
            .user_by_id(id)
            .map(|u| session_for(&u.user))
            .ok_or(AppError::NotAuthenticated)
    }

    fn use_session_token(&self, access_token: Option<String>) {
        self.state.lock().unwrap().session_token = access_token;
    }
}

#[async_trait]
impl DocumentAnalyzer for MemoryBackend {
    async fn analyze_id_document(&self, _image: &MediaUpload) -> AppResult<DocumentAnalysis> {
        let mut state = self.state.lock().unwrap();
        state.analysis_calls += 1;
        match state.analysis.clone() {
            Some(Ok(analysis)) => Ok(analysis),
            Some(Err(message)) => Err(AppError::Analysis(message)),
            None => Ok(DocumentAnalysis {
                is_document_valid: false,
                extracted_name: None,
            }),
        }
    }
}
