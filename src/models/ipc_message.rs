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

//! IPC message models for communication between the core and the UI

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Type of IPC message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Event,
}

/// An IPC message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcMessage {
    /// Unique message ID (UUID)
    pub id: String,

    /// Message type
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Method name for requests and events
    #[serde(default)]
    pub method: Option<String>,

    /// Parameters for requests
    #[serde(default)]
    pub params: Option<Value>,

    /// Result for responses
    #[serde(default)]
    pub result: Option<Value>,

    /// Error for failed responses
    #[serde(default)]
    pub error: Option<IpcError>,
}

impl IpcMessage {
    /// Create a new request message
    pub fn request(method: &str, params: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type: MessageType::Request,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    /// Create a success response
    pub fn response_ok(id: &str, result: Value) -> Self {
        Self {
            id: id.to_string(),
            message_type: MessageType::Response,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn response_err(id: &str, error: IpcError) -> Self {
        Self {
            id: id.to_string(),
            message_type: MessageType::Response,
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Response for a handler outcome
    pub fn reply(id: &str, outcome: Result<Value, IpcError>) -> Self {
        match outcome {
            Ok(result) => Self::response_ok(id, result),
            Err(error) => Self::response_err(id, error),
        }
    }

    /// Create an event message
    pub fn event(method: &str, params: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type: MessageType::Event,
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }
}

/// Error in an IPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    /// Error code
    pub code: i32,
    /// User-facing message
    pub message: String,
    /// Additional error data
    #[serde(default)]
    pub data: Option<Value>,
}

impl IpcError {
    /// Create a new error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Add data to the error
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&AppError> for IpcError {
    fn from(err: &AppError) -> Self {
        IpcError::new(err.ipc_code(), err.user_message())
            .with_data(serde_json::json!({ "detail": err.to_string() }))
    }
}

/// Standard error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Application-specific errors
    pub const NOT_AUTHENTICATED: i32 = -1001;
    pub const NETWORK_ERROR: i32 = -1003;
    pub const API_ERROR: i32 = -1004;
    pub const MISSING_SCHEMA: i32 = -1006;
    pub const PERMISSION_DENIED: i32 = -1007;
    pub const VALIDATION_FAILED: i32 = -1008;
    pub const NOT_FOUND: i32 = -1009;
    pub const UPLOAD_FAILED: i32 = -1010;
    pub const BUSY: i32 = -1011;
}

/// IPC method names
pub mod methods {
    // Authentication
    pub const AUTH_SIGN_UP: &str = "auth.sign_up";
    pub const AUTH_SIGN_IN: &str = "auth.sign_in";
    pub const AUTH_SIGN_OUT: &str = "auth.sign_out";
    pub const AUTH_RESEND_CONFIRMATION: &str = "auth.resend_confirmation";
    pub const AUTH_SESSION: &str = "auth.session";
    pub const AUTH_REFRESH: &str = "auth.refresh";

    // Welcome dialog
    pub const WELCOME_CHECK: &str = "welcome.check";

    // Search / feed
    pub const SEARCH_SET_TERM: &str = "search.set_term";
    pub const SEARCH_SET_FILTER: &str = "search.set_filter";
    pub const SEARCH_SET_TARGET: &str = "search.set_target";
    pub const SEARCH_RETRY: &str = "search.retry";
    pub const SEARCH_STATE: &str = "search.state";

    // Profiles
    pub const PROFILE_GET: &str = "profile.get";
    pub const PROFILE_FOLLOW_TOGGLE: &str = "profile.follow_toggle";
    pub const PROFILE_UPDATE: &str = "profile.update";

    // Posts
    pub const POST_CREATE_ACCESS: &str = "post.create_access";
    pub const POST_CREATE: &str = "post.create";
    pub const POST_CONTACT_LINKS: &str = "post.contact_links";

    // Verification
    pub const VERIFICATION_SUBMIT: &str = "verification.submit";

    // System
    pub const PING: &str = "ping";
    pub const SHUTDOWN: &str = "shutdown";
}

/// Event names pushed to the UI
pub mod events {
    pub const SESSION_CHANGED: &str = "event.session_changed";
    pub const VERIFICATION_PROGRESS: &str = "event.verification_progress";
}
