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

//! Data models for the marketplace core
//!
//! These models represent the core data structures used throughout the application,
//! including profiles, posts, follow edges, auth sessions and IPC messages.

mod auth;
mod follow;
mod ipc_message;
mod media;
mod post;
mod profile;
mod search;
mod verification;

pub use auth::*;
pub use follow::*;
pub use ipc_message::*;
pub use media::*;
pub use post::*;
pub use profile::*;
pub use search::*;
pub use verification::*;
