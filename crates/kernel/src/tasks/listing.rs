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

use std::time::SystemTime;

use waitq_common::Obj;
use waitq_common::model::WorldState;
use waitq_common::tasks::SystemTask;

use crate::tasks::Routine;
use crate::tasks::bulk::QueueFilter;
use crate::tasks::command_queue::CommandQueue;
use crate::tasks::queue_entry::QueueEntry;

/// A queued command as shown in a listing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ListedEntry {
    pub executor: Obj,
    pub enactor: Obj,
    pub command: String,
    pub args: Vec<String>,
    pub semaphore: Option<Obj>,
    /// Seconds until due, for timed entries. Negative if overdue.
    pub remaining_secs: Option<i64>,
}

/// A snapshot of the queue, wait entries first, then semaphore waits, then system dispatches,
/// each in schedule order.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct QueueListing {
    pub waiting: Vec<ListedEntry>,
    pub semaphores: Vec<ListedEntry>,
    pub system: Vec<(i64, SystemTask)>,
    pub total_waiting: usize,
    pub total_semaphores: usize,
}

/// Whole seconds from `now` until `when`, rounded towards zero.
pub fn secs_until(when: SystemTime, now: SystemTime) -> i64 {
    match when.duration_since(now) {
        Ok(ahead) => ahead.as_secs() as i64,
        Err(behind) => -(behind.duration().as_secs() as i64),
    }
}

fn listed(entry: &QueueEntry, now: SystemTime) -> ListedEntry {
    ListedEntry {
        executor: entry.executor,
        enactor: entry.enactor,
        command: entry.command().to_string(),
        args: entry.args().map(str::to_string).collect(),
        semaphore: entry.semaphore.as_ref().map(|s| s.object),
        remaining_secs: entry
            .is_timed
            .then(|| secs_until(entry.wait_until, now)),
    }
}

impl CommandQueue {
    /// Collect what the filter selects, plus totals over everything. Leaves the queue untouched.
    pub fn inspect(
        &self,
        world: &dyn WorldState,
        filter: &QueueFilter,
        now: SystemTime,
    ) -> QueueListing {
        let mut listing = QueueListing::default();
        for record in self.task_q().iter_ordered() {
            match &record.payload {
                Routine::Queued { entry, .. } => {
                    let semaphore_wait = record.payload.is_semaphore_wait();
                    if semaphore_wait {
                        listing.total_semaphores += 1;
                    } else {
                        listing.total_waiting += 1;
                    }
                    if !filter.matches(world, entry) {
                        continue;
                    }
                    let shown = listed(entry, now);
                    if semaphore_wait {
                        listing.semaphores.push(shown);
                    } else {
                        listing.waiting.push(shown);
                    }
                }
                Routine::System(task) => {
                    listing.system.push((secs_until(record.when, now), *task));
                }
            }
        }
        listing
    }
}
