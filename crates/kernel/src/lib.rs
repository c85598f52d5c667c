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

pub use crate::config::{Config, QueueConfig};
pub use crate::tasks::bulk::{NotifyMode, QueueFilter};
pub use crate::tasks::command_queue::{CommandQueue, KickOutcome};
pub use crate::tasks::exec::{
    CommandCall, ExecContext, ExecParams, Flow, Interpreter, Processed, split_command,
};
pub use crate::tasks::listing::{ListedEntry, QueueListing};
pub use crate::tasks::queue_entry::{Invocation, QueueEntry, Semaphore};
pub use crate::tasks::task_q::{Priority, TaskHandle, TaskQ};
pub use crate::tasks::wait::WaitFor;
pub use waitq_common::tasks::{QueueError, SystemTask};

pub mod admin;
pub mod config;
pub mod tasks;
pub mod util;

pub mod testing;
