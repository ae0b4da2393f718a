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

//! Search and feed models

use serde::{Deserialize, Serialize};

use super::{Post, PostType, Profile};

/// What the search box searches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SearchTarget {
    #[default]
    Posts,
    Users,
}

/// Inputs of the search controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SearchCriteria {
    /// Free text; empty means "everything"
    pub term: String,

    /// Restrict posts to one category
    pub filter: Option<PostType>,

    pub target: SearchTarget,
}

impl SearchCriteria {
    /// Heading shown above the results
    pub fn heading(&self) -> String {
        match self.target {
            SearchTarget::Posts => "Publicado Recientemente".to_string(),
            SearchTarget::Users => format!("Resultados para \"{}\"", self.term),
        }
    }
}

/// Results of one search query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "target", content = "items", rename_all = "snake_case")]
pub enum SearchResults {
    Posts(Vec<Post>),
    Users(Vec<Profile>),
}

impl SearchResults {
    pub fn empty(target: SearchTarget) -> Self {
        match target {
            SearchTarget::Posts => SearchResults::Posts(Vec::new()),
            SearchTarget::Users => SearchResults::Users(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SearchResults::Posts(posts) => posts.len(),
            SearchResults::Users(users) => users.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Feed state exposed to the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub criteria: SearchCriteria,

    pub heading: String,

    /// Sequence number of the newest issued request
    pub latest_request: u64,

    /// Sequence number of the request whose results are shown
    pub applied_request: u64,

    pub loading: bool,

    pub results: SearchResults,

    /// User-facing message of the last failure, cleared on the next success
    pub error: Option<String>,
}

/// What happened to a finished query
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// Results were stored in the feed
    Applied(SearchResults),
    /// A newer request was issued while this one ran; results dropped
    Superseded { request: u64, latest: u64 },
}
