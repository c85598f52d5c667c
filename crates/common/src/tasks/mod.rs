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

mod errors;

pub use errors::QueueError;

use strum::{Display, EnumIter};

/// Periodic server housekeeping that shares the scheduler with queued commands.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter)]
pub enum SystemTask {
    DatabaseDump,
    FreeListReconstruction,
    IdleCheck,
    CheckEvents,
    CacheTick,
    ProcessCommand,
}

impl SystemTask {
    /// How the task is described in queue listings.
    pub fn description(&self) -> &'static str {
        match self {
            SystemTask::DatabaseDump => "auto-@dump",
            SystemTask::FreeListReconstruction => "auto-@dbck",
            SystemTask::IdleCheck => "Check for idle players",
            SystemTask::CheckEvents => "Test for @daily time",
            SystemTask::CacheTick => "Database cache tick",
            SystemTask::ProcessCommand => "Further command quota",
        }
    }
}
