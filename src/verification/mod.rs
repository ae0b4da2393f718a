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

//! Identity verification: compare the name on an ID photo with the profile name

use serde_json::{json, Map};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{AuthProvider, DocumentAnalyzer};
use crate::error::{AppError, AppResult};
use crate::models::{MediaUpload, VerificationResult, VerificationStage};
use crate::session::SessionContext;

/// Shown when the model did not recognise a valid credential
pub const MSG_INVALID_DOCUMENT: &str =
    "No se pudo reconocer una credencial válida. Por favor, sube una foto clara y bien iluminada.";

pub struct VerificationService {
    /// `None` when no analysis key is configured
    analyzer: Option<Arc<dyn DocumentAnalyzer>>,
    auth: Arc<dyn AuthProvider>,
    session: Arc<SessionContext>,
    progress: broadcast::Sender<VerificationStage>,
}

impl VerificationService {
    pub fn new(
        analyzer: Option<Arc<dyn DocumentAnalyzer>>,
        auth: Arc<dyn AuthProvider>,
        session: Arc<SessionContext>,
    ) -> Self {
        let (progress, _) = broadcast::channel(16);
        Self {
            analyzer,
            auth,
            session,
            progress,
        }
    }

    /// Stage changes of running verifications
    pub fn subscribe_progress(&self) -> broadcast::Receiver<VerificationStage> {
        self.progress.subscribe()
    }

    fn report(&self, stage: VerificationStage) {
        debug!("Verification stage: {}", stage.status_message());
        let _ = self.progress.send(stage);
    }

    /// Run one verification attempt; failures are not retried
    pub async fn verify(&self, image: &MediaUpload) -> AppResult<VerificationResult> {
        let (user, access_token) = self.session.require_token().await?;

        if !image.is_image() {
            return Err(AppError::Validation(
                "Por favor, selecciona un archivo de imagen.".to_string(),
            ));
        }

        let analyzer = self
            .analyzer
            .as_ref()
            .ok_or_else(|| AppError::Config("GEMINI_API_KEY is not set".to_string()))?;

        self.report(VerificationStage::Uploading);
        self.report(VerificationStage::Analyzing);
        let analysis = analyzer.analyze_id_document(image).await?;

        let extracted_name = match analysis.extracted_name {
            Some(name) if analysis.is_document_valid && !name.trim().is_empty() => name,
            _ => {
                warn!("Document for {} was not recognised as a valid credential", user.id);
                return Err(AppError::Validation(MSG_INVALID_DOCUMENT.to_string()));
            }
        };

        self.report(VerificationStage::Comparing);
        if !names_match(&extracted_name, &user.name) {
            info!("Verification name mismatch for {}", user.id);
            return Err(AppError::Validation(format!(
                "El nombre en la credencial (\"{}\") no coincide con tu nombre de perfil (\"{}\").",
                extracted_name, user.name
            )));
        }

        self.report(VerificationStage::UpdatingProfile);
        let mut metadata = Map::new();
        metadata.insert("isVerified".into(), json!(true));
        self.auth
            .update_user_metadata(&access_token, metadata)
            .await?;

        if let Err(e) = self.session.refresh().await {
            warn!("Verified, but refreshing the session failed: {}", e);
        }

        self.report(VerificationStage::Verified);
        info!("User {} verified", user.id);

        Ok(VerificationResult {
            verified: true,
            extracted_name,
            message: VerificationStage::Verified.status_message().to_string(),
        })
    }
}

/// Case-insensitive comparison with whitespace runs collapsed
pub fn names_match(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
