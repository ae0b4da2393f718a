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

//! Search/filter controller for the feed
//!
//! Every criteria change issues one query tagged with a sequence number. Only
//! the response to the newest request is applied; older responses that resolve
//! late are dropped so they cannot overwrite fresher results.

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::MarketplaceRepository;
use crate::error::{AppError, AppResult};
use crate::models::{FeedSnapshot, PostType, SearchCriteria, SearchOutcome, SearchResults, SearchTarget};

/// An issued query waiting for its response
#[derive(Debug, Clone)]
pub struct SearchTicket {
    pub request: u64,
    pub criteria: SearchCriteria,
}

struct FeedState {
    criteria: SearchCriteria,
    latest: u64,
    applied: u64,
    loading: bool,
    results: SearchResults,
    error: Option<String>,
}

pub struct SearchController {
    repository: MarketplaceRepository,
    state: Mutex<FeedState>,
}

impl SearchController {
    pub fn new(repository: MarketplaceRepository) -> Self {
        Self {
            repository,
            state: Mutex::new(FeedState {
                criteria: SearchCriteria::default(),
                latest: 0,
                applied: 0,
                loading: false,
                results: SearchResults::empty(SearchTarget::Posts),
                error: None,
            }),
        }
    }

    pub async fn set_term(&self, term: &str) -> AppResult<SearchOutcome> {
        let term = term.to_string();
        self.run(move |criteria| criteria.term = term).await
    }

    /// Restrict posts to one category, or `None` for all
    pub async fn set_filter(&self, filter: Option<PostType>) -> AppResult<SearchOutcome> {
        if filter.is_some() && self.state.lock().await.criteria.target == SearchTarget::Users {
            return Err(AppError::Validation(
                "Los filtros solo aplican a publicaciones.".to_string(),
            ));
        }
        self.run(move |criteria| criteria.filter = filter).await
    }

    /// Switch between posts and people; always clears the category filter
    pub async fn set_target(&self, target: SearchTarget) -> AppResult<SearchOutcome> {
        self.run(move |criteria| {
            criteria.target = target;
            criteria.filter = None;
        })
        .await
    }

    /// Re-issue the current query ("try again")
    pub async fn retry(&self) -> AppResult<SearchOutcome> {
        self.run(|_| {}).await
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        let state = self.state.lock().await;
        FeedSnapshot {
            heading: state.criteria.heading(),
            criteria: state.criteria.clone(),
            latest_request: state.latest,
            applied_request: state.applied,
            loading: state.loading,
            results: state.results.clone(),
            error: state.error.clone(),
        }
    }

    /// Apply a criteria change, query, and store the response if still current
    pub async fn run<F>(&self, update: F) -> AppResult<SearchOutcome>
    where
        F: FnOnce(&mut SearchCriteria),
    {
        let ticket = self.issue(update).await;
        let result = self.execute(&ticket.criteria).await;
        self.complete(&ticket, result).await
    }

    /// Update the criteria and reserve the next sequence number
    pub async fn issue<F>(&self, update: F) -> SearchTicket
    where
        F: FnOnce(&mut SearchCriteria),
    {
        let mut state = self.state.lock().await;
        update(&mut state.criteria);
        state.latest += 1;
        state.loading = true;

        debug!("Search request {} issued: {:?}", state.latest, state.criteria);

        SearchTicket {
            request: state.latest,
            criteria: state.criteria.clone(),
        }
    }

    /// Query the backend for `criteria`
    pub async fn execute(&self, criteria: &SearchCriteria) -> AppResult<SearchResults> {
        match criteria.target {
            SearchTarget::Posts => self
                .repository
                .search_posts(&criteria.term, criteria.filter)
                .await
                .map(SearchResults::Posts),
            SearchTarget::Users => self
                .repository
                .search_profiles(&criteria.term)
                .await
                .map(SearchResults::Users),
        }
    }

    /// Store a response unless a newer request has been issued since
    pub async fn complete(
        &self,
        ticket: &SearchTicket,
        result: AppResult<SearchResults>,
    ) -> AppResult<SearchOutcome> {
        let mut state = self.state.lock().await;

        if ticket.request != state.latest {
            debug!(
                "Dropping response to search request {} (latest is {})",
                ticket.request, state.latest
            );
            return Ok(SearchOutcome::Superseded {
                request: ticket.request,
                latest: state.latest,
            });
        }

        state.loading = false;
        state.applied = ticket.request;

        match result {
            Ok(results) => {
                state.results = results.clone();
                state.error = None;
                Ok(SearchOutcome::Applied(results))
            }
            Err(e) => {
                warn!("Search request {} failed: {}", ticket.request, e);
                state.results = SearchResults::empty(ticket.criteria.target);
                state.error = Some(e.user_message());
                Err(e)
            }
        }
    }
}
