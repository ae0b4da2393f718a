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

//! Converters between backend rows and marketplace models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};

use crate::error::{AppError, AppResult};
use crate::models::{JobType, MediaRef, Post, PostDraft, PostKind, PostType, Profile, PropertyType};

/// Raw `items` row as stored by the posting forms (camelCase columns)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRow {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    post_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    contact_info: Option<String>,
    #[serde(default)]
    media_urls: Option<Vec<MediaRef>>,
    #[serde(deserialize_with = "id_string")]
    user_id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    profiles: Option<Value>,

    // Item
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    accepts_digital_payment: Option<bool>,

    // Job
    #[serde(default)]
    job_title: Option<String>,
    #[serde(default)]
    salary: Option<String>,
    #[serde(default)]
    job_type: Option<JobType>,

    // Rental
    #[serde(default)]
    rental_price: Option<f64>,
    #[serde(default)]
    property_type: Option<PropertyType>,
    #[serde(default)]
    bedrooms: Option<u32>,
    #[serde(default)]
    bathrooms: Option<u32>,
}

/// Ids may be uuids (text) or bigint identities
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {}", other))),
    }
}

/// Convert a profile row
pub fn convert_profile_row(row: &Value) -> AppResult<Profile> {
    Ok(serde_json::from_value(row.clone())?)
}

/// Convert an `items` row (optionally joined with `profiles`) to a Post
pub fn convert_post_row(row: &Value) -> AppResult<Post> {
    let row: PostRow = serde_json::from_value(row.clone())?;

    // Rows written before categories existed have no postType
    let post_type = match row.post_type.as_deref() {
        None => PostType::Item,
        Some(raw) => PostType::parse(raw)
            .ok_or_else(|| AppError::Validation(format!("unknown postType {}", raw)))?,
    };

    let kind = match post_type {
        PostType::Item => PostKind::Item {
            price: row.price.unwrap_or_default(),
            accepts_digital_payment: row.accepts_digital_payment.unwrap_or(false),
        },
        PostType::Job => PostKind::Job {
            job_title: row.job_title.unwrap_or_default(),
            salary: row.salary.filter(|s| !s.is_empty()),
            job_type: row.job_type.unwrap_or_default(),
        },
        PostType::Rental => PostKind::Rental {
            rental_price: row.rental_price.unwrap_or_default(),
            property_type: row.property_type,
            bedrooms: row.bedrooms,
            bathrooms: row.bathrooms,
        },
    };

    // An unresolved join is a placeholder, not an error
    let profile = row
        .profiles
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value::<Profile>(v).ok());

    Ok(Post {
        id: row.id,
        description: row.description.unwrap_or_default(),
        contact_info: row.contact_info.unwrap_or_default(),
        media: row.media_urls.unwrap_or_default(),
        user_id: row.user_id,
        created_at: row.created_at,
        profile,
        kind,
    })
}

/// Build the `items` row for a new listing
pub fn new_post_row(
    draft: &PostDraft,
    user_id: &str,
    media: &[MediaRef],
    created_at: DateTime<Utc>,
) -> Value {
    let mut row = Map::new();
    row.insert("postType".into(), json!(draft.kind.post_type().as_str()));
    row.insert("description".into(), json!(draft.description.trim()));
    row.insert("contactInfo".into(), json!(draft.contact_info.trim()));
    row.insert("mediaUrls".into(), json!(media));
    row.insert("userId".into(), json!(user_id));
    row.insert("createdAt".into(), json!(created_at.to_rfc3339()));

    match &draft.kind {
        PostKind::Item {
            price,
            accepts_digital_payment,
        } => {
            row.insert("price".into(), json!(price));
            row.insert("acceptsDigitalPayment".into(), json!(accepts_digital_payment));
        }
        PostKind::Job {
            job_title,
            salary,
            job_type,
        } => {
            row.insert("jobTitle".into(), json!(job_title.trim()));
            row.insert("salary".into(), json!(salary));
            row.insert("jobType".into(), json!(job_type));
        }
        PostKind::Rental {
            rental_price,
            property_type,
            bedrooms,
            bathrooms,
        } => {
            row.insert("rentalPrice".into(), json!(rental_price));
            row.insert("propertyType".into(), json!(property_type));
            row.insert("bedrooms".into(), json!(bedrooms));
            row.insert("bathrooms".into(), json!(bathrooms));
        }
    }

    Value::Object(row)
}
