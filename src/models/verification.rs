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

//! Identity document verification models

use serde::{Deserialize, Serialize};

/// Structured judgment returned by the document analysis model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentAnalysis {
    #[serde(rename = "isDocumentValid", alias = "isIdValid", default)]
    pub is_document_valid: bool,

    #[serde(rename = "extractedName", default)]
    pub extracted_name: Option<String>,
}

/// Progress steps reported while a verification runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    Uploading,
    Analyzing,
    Comparing,
    UpdatingProfile,
    Verified,
}

impl VerificationStage {
    pub fn status_message(&self) -> &'static str {
        match self {
            VerificationStage::Uploading => "Subiendo imagen...",
            VerificationStage::Analyzing => "Analizando ID con IA...",
            VerificationStage::Comparing => "Comparando nombres...",
            VerificationStage::UpdatingProfile => "Actualizando perfil...",
            VerificationStage::Verified => "¡Verificación exitosa!",
        }
    }
}

/// Successful verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub extracted_name: String,
    pub message: String,
}
