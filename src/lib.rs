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

//! Marketplace Core - Rust core for the Nochistlán community marketplace
//!
//! Talks to the hosted backend (database, storage, auth) and the document
//! analysis service, and serves the UI over a local JSON IPC channel.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod ipc;
pub mod logger;
pub mod models;
pub mod posting;
pub mod profile;
pub mod search;
pub mod session;
pub mod verification;

#[cfg(test)]
mod test_support;
