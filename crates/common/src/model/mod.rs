// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

pub use crate::model::objects::ObjFlag;
pub use crate::model::world_state::{WorldState, WorldStateError};

mod objects;
mod world_state;

/// Attribute holding the default semaphore counter on an object.
pub const SEMAPHORE_ATTR: &str = "SEMAPHORE";

/// Attribute holding an owner's count of outstanding queue entries.
pub const QUEUE_COUNT_ATTR: &str = "QUEUE";

/// Optional per-owner override of the outstanding entry quota.
pub const QUEUE_MAX_ATTR: &str = "QUEUEMAX";
