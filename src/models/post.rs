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

//! Post model: a listing of type item, job or rental

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{MediaRef, Profile};
use crate::error::{AppError, AppResult};

/// Listing category, as stored in the `postType` column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    Item,
    Job,
    Rental,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Item => "item",
            PostType::Job => "job",
            PostType::Rental => "rental",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "item" => Some(PostType::Item),
            "job" => Some(PostType::Job),
            "rental" => Some(PostType::Rental),
            _ => None,
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Employment type of a job listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum JobType {
    #[default]
    #[serde(rename = "Tiempo Completo")]
    FullTime,
    #[serde(rename = "Medio Tiempo")]
    PartTime,
    #[serde(rename = "Contrato")]
    Contract,
    #[serde(rename = "Temporal")]
    Temporary,
}

/// Kind of property offered for rent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PropertyType {
    #[serde(rename = "Casa")]
    House,
    #[serde(rename = "Departamento")]
    Apartment,
    #[serde(rename = "Cuarto")]
    Room,
}

/// Fields that only exist for one listing category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "post_type", rename_all = "snake_case")]
pub enum PostKind {
    Item {
        price: f64,
        #[serde(default)]
        accepts_digital_payment: bool,
    },
    Job {
        job_title: String,
        #[serde(default)]
        salary: Option<String>,
        #[serde(default)]
        job_type: JobType,
    },
    Rental {
        rental_price: f64,
        #[serde(default)]
        property_type: Option<PropertyType>,
        #[serde(default)]
        bedrooms: Option<u32>,
        #[serde(default)]
        bathrooms: Option<u32>,
    },
}

impl PostKind {
    pub fn post_type(&self) -> PostType {
        match self {
            PostKind::Item { .. } => PostType::Item,
            PostKind::Job { .. } => PostType::Job,
            PostKind::Rental { .. } => PostType::Rental,
        }
    }
}

/// A marketplace listing joined with its owner's profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: String,

    pub description: String,

    /// Phone number or other free-text contact
    pub contact_info: String,

    /// Uploaded media in display order
    pub media: Vec<MediaRef>,

    /// Owner of the listing
    pub user_id: String,

    pub created_at: DateTime<Utc>,

    /// Owner profile; `None` while the join has not resolved
    pub profile: Option<Profile>,

    #[serde(flatten)]
    pub kind: PostKind,
}

impl Post {
    pub fn post_type(&self) -> PostType {
        self.kind.post_type()
    }

    /// Job title for job listings
    pub fn job_title(&self) -> Option<&str> {
        match &self.kind {
            PostKind::Job { job_title, .. } => Some(job_title),
            _ => None,
        }
    }

    /// Case-insensitive substring match on description or job title
    pub fn matches_term(&self, term: &str) -> bool {
        let needle = term.to_lowercase();
        self.description.to_lowercase().contains(&needle)
            || self
                .job_title()
                .map(|t| t.to_lowercase().contains(&needle))
                .unwrap_or(false)
    }

    /// Links used by the call / message buttons
    pub fn contact_links(&self) -> ContactLinks {
        ContactLinks::from_contact_info(&self.contact_info)
    }
}

/// `tel:` and WhatsApp links derived from a contact string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContactLinks {
    pub call: Option<String>,
    pub message: Option<String>,
}

impl ContactLinks {
    pub fn from_contact_info(contact_info: &str) -> Self {
        let digits: String = contact_info.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Self::default();
        }

        Self {
            call: Some(format!("tel:{}", digits)),
            message: Some(format!("https://wa.me/{}", digits)),
        }
    }
}

/// A listing being created from one of the posting forms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDraft {
    pub description: String,
    pub contact_info: String,
    #[serde(flatten)]
    pub kind: PostKind,
}

impl PostDraft {
    /// Required-field checks done before any upload starts
    pub fn validate(&self) -> AppResult<()> {
        if self.description.trim().is_empty() {
            return Err(AppError::Validation("La descripción es obligatoria.".into()));
        }
        if self.contact_info.trim().is_empty() {
            return Err(AppError::Validation(
                "La información de contacto es obligatoria.".into(),
            ));
        }

        match &self.kind {
            PostKind::Item { price, .. } => validate_price(*price),
            PostKind::Job { job_title, .. } => {
                if job_title.trim().is_empty() {
                    Err(AppError::Validation("El título del puesto es obligatorio.".into()))
                } else {
                    Ok(())
                }
            }
            PostKind::Rental {
                rental_price,
                property_type,
                ..
            } => {
                if property_type.is_none() {
                    return Err(AppError::Validation(
                        "El tipo de propiedad es obligatorio.".into(),
                    ));
                }
                validate_price(*rental_price)
            }
        }
    }
}

fn validate_price(price: f64) -> AppResult<()> {
    if price.is_finite() && price >= 0.0 {
        Ok(())
    } else {
        Err(AppError::Validation("El precio no es válido.".into()))
    }
}
