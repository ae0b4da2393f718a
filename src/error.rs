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

//! Error types for the marketplace core
//!
//! Every failure is caught where the UI triggered it and turned into a static,
//! user-facing message. Nothing here is fatal to the process.

use thiserror::Error;

use crate::models::error_codes;

/// Generic message shown for network and unknown backend failures
pub const MSG_NETWORK: &str =
    "No se pudieron cargar los datos. Por favor, revisa tu conexión e inténtalo de nuevo.";
/// Shown when a backend table is missing
pub const MSG_MISSING_SCHEMA: &str = "Una tabla requerida no existe. Por favor, asegúrate de haber ejecutado las migraciones de la base de datos en tu proyecto de Supabase.";
/// Shown when row-level security rejected the request
pub const MSG_PERMISSION: &str = "No se pudo cargar debido a políticas de seguridad. Por favor, revisa las políticas de Seguridad a Nivel de Fila (RLS) de Supabase.";
/// Shown when a profile does not exist
pub const MSG_PROFILE_NOT_FOUND: &str = "No se pudo encontrar el perfil.";
/// Shown when an action needs a session
pub const MSG_NOT_AUTHENTICATED: &str = "Debes iniciar sesión para continuar.";
/// Shown for anything unexpected
pub const MSG_UNEXPECTED: &str = "Ocurrió un error inesperado. Inténtalo de nuevo.";
/// Shown when the provider rejects an e-mail and password pair
pub const MSG_INVALID_CREDENTIALS: &str = "Correo o contraseña incorrectos.";
/// Shown when signing up with an e-mail address that already has an account
pub const MSG_ALREADY_REGISTERED: &str = "Ya existe una cuenta con este correo.";
/// Shown when signing in before confirming the e-mail address
pub const MSG_EMAIL_NOT_CONFIRMED: &str =
    "Confirma tu correo electrónico antes de iniciar sesión.";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Missing table: {0}")]
    MissingSchema(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Upload of {file_name} failed: {message}")]
    Upload { file_name: String, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Document analysis failed: {0}")]
    Analysis(String),

    #[error("Operation already in progress")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Classify a backend error body (`{code, message}`) returned with `status`
    pub fn from_backend(status: u16, code: Option<&str>, message: &str) -> Self {
        let code = code.unwrap_or_default();

        if code == "42P01" || (message.contains("relation") && message.contains("does not exist")) {
            AppError::MissingSchema(message.to_string())
        } else if code == "42501" || message.contains("violates row-level security policy") {
            AppError::Permission(message.to_string())
        } else if code == "PGRST116" || status == 404 {
            AppError::NotFound(message.to_string())
        } else if status == 401 {
            AppError::NotAuthenticated
        } else {
            AppError::Api {
                status,
                message: message.to_string(),
            }
        }
    }

    /// Static message shown to the user
    pub fn user_message(&self) -> String {
        match self {
            AppError::Network(_) => MSG_NETWORK.to_string(),
            AppError::MissingSchema(_) => MSG_MISSING_SCHEMA.to_string(),
            AppError::Permission(_) => MSG_PERMISSION.to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(_) => MSG_PROFILE_NOT_FOUND.to_string(),
            AppError::NotAuthenticated => MSG_NOT_AUTHENTICATED.to_string(),
            AppError::Upload { file_name, .. } => format!("Error al subir {}.", file_name),
            AppError::Analysis(_) => "Ocurrió un error inesperado durante la verificación.".to_string(),
            AppError::Busy => "Espera a que termine la operación en curso.".to_string(),
            AppError::Api { .. }
            | AppError::Config(_)
            | AppError::Cache(_)
            | AppError::Serialization(_) => MSG_UNEXPECTED.to_string(),
        }
    }

    /// IPC error code for this failure
    pub fn ipc_code(&self) -> i32 {
        match self {
            AppError::Network(_) => error_codes::NETWORK_ERROR,
            AppError::MissingSchema(_) => error_codes::MISSING_SCHEMA,
            AppError::Permission(_) => error_codes::PERMISSION_DENIED,
            AppError::Validation(_) => error_codes::VALIDATION_FAILED,
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::NotAuthenticated => error_codes::NOT_AUTHENTICATED,
            AppError::Upload { .. } => error_codes::UPLOAD_FAILED,
            AppError::Api { .. } | AppError::Analysis(_) => error_codes::API_ERROR,
            AppError::Busy => error_codes::BUSY,
            AppError::Config(_) | AppError::Cache(_) | AppError::Serialization(_) => {
                error_codes::INTERNAL_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or_default(),
                message: err.to_string(),
            }
        } else {
            AppError::Network(err.to_string())
        }
    }
}

/// Result type alias for core operations
pub type AppResult<T> = Result<T, AppError>;
