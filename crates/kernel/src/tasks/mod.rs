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

use strum::Display;
use waitq_common::Obj;
use waitq_common::model::WorldState;
use waitq_common::tasks::SystemTask;
use waitq_common::util::parse_counter;

pub mod bulk;
pub mod command_queue;
pub mod exec;
pub mod listing;
pub mod queue_entry;
pub mod task_q;
pub mod wait;

/// Positional argument slots carried by a queue entry.
pub const NUM_ENV_VARS: usize = 10;

/// Scratch registers saved with a queue entry and restored when it runs.
pub const MAX_GLOBAL_REGS: usize = 10;

/// What a queued command is waiting to do when its turn comes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum QueuedKind {
    /// Run the command.
    RunCommand,
    /// The entry is blocked on a semaphore; if this fires it is because the wait timed out.
    SemaphoreTimeout,
}

/// The payload of every record in the scheduler.
#[derive(Debug)]
pub enum Routine {
    Queued {
        kind: QueuedKind,
        entry: Box<queue_entry::QueueEntry>,
    },
    System(SystemTask),
}

impl Routine {
    pub fn entry(&self) -> Option<&queue_entry::QueueEntry> {
        match self {
            Routine::Queued { entry, .. } => Some(entry),
            Routine::System(_) => None,
        }
    }

    pub fn is_semaphore_wait(&self) -> bool {
        matches!(
            self,
            Routine::Queued {
                kind: QueuedKind::SemaphoreTimeout,
                ..
            }
        )
    }
}

/// Adjust an integer counter kept as text in an attribute, returning the new value.
/// A missing or non-numeric attribute counts as zero, and a result of zero clears it.
pub fn add_to(world: &mut dyn WorldState, obj: &Obj, attr: &str, delta: i64) -> i64 {
    let current = world.attr_get(obj, attr).map_or(0, |v| parse_counter(&v));
    let updated = current.saturating_add(delta);
    if updated == 0 {
        world.attr_clear(obj, attr);
    } else {
        world.attr_set(obj, attr, &updated.to_string());
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryWorld;

    #[test]
    fn test_add_to_round_trips_through_zero() {
        let mut world = MemoryWorld::new();
        let obj = world.add_thing("widget", world.wizard());
        assert_eq!(add_to(&mut world, &obj, "SEMAPHORE", 2), 2);
        assert_eq!(world.attr_get(&obj, "SEMAPHORE").as_deref(), Some("2"));
        assert_eq!(add_to(&mut world, &obj, "SEMAPHORE", -2), 0);
        assert_eq!(world.attr_get(&obj, "SEMAPHORE"), None);
        assert_eq!(add_to(&mut world, &obj, "SEMAPHORE", -1), -1);
        assert_eq!(world.attr_get(&obj, "SEMAPHORE").as_deref(), Some("-1"));
    }

    #[test]
    fn test_add_to_treats_garbage_as_zero() {
        let mut world = MemoryWorld::new();
        let obj = world.add_thing("widget", world.wizard());
        world.attr_set(&obj, "SEMAPHORE", "lots");
        assert_eq!(add_to(&mut world, &obj, "SEMAPHORE", 1), 1);
    }
}
