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

//! Timed waits and semaphores.
//!
//! A semaphore is nothing more than an integer counter kept in an attribute on some object. A
//! wait against it bumps the counter and parks the entry in the scheduler under the
//! semaphore-timeout routine: suspended if it has no deadline, so that only a notify can free
//! it, or at normal priority with its deadline if it has one, in which case whichever of the
//! deadline or a notify comes first wins.

use std::time::SystemTime;

use tracing::debug;
use waitq_common::Obj;
use waitq_common::model::WorldState;
use waitq_common::tasks::QueueError;

use crate::tasks::command_queue::CommandQueue;
use crate::tasks::queue_entry::{Invocation, QueueEntry, Semaphore};
use crate::tasks::task_q::{Priority, TaskHandle};
use crate::tasks::{QueuedKind, Routine, add_to};

/// When a queued command should run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WaitFor {
    /// As soon as the queue gets to it.
    Immediate,
    /// Not before the given time.
    Until(SystemTime),
    /// When the semaphore is notified, or at the deadline if there is one.
    Semaphore {
        semaphore: Semaphore,
        timeout: Option<SystemTime>,
    },
}

/// Commands caused by a player run ahead of commands caused by things.
pub(crate) fn priority_for(world: &dyn WorldState, enactor: &Obj) -> Priority {
    if world.is_player(enactor) {
        Priority::Player
    } else {
        Priority::Object
    }
}

impl CommandQueue {
    /// Queue a command: charge for it, then register it according to `wait`.
    pub fn wait(
        &mut self,
        world: &mut dyn WorldState,
        invocation: &Invocation<'_>,
        wait: WaitFor,
    ) -> Result<TaskHandle, QueueError> {
        if !self.interpretation_enabled() {
            return Err(QueueError::InterpretationDisabled);
        }
        let entry = self.create_entry(world, invocation)?;
        let handle = match wait {
            WaitFor::Immediate => self.schedule(world, entry, None, None),
            WaitFor::Until(due) => self.schedule(world, entry, Some(due), None),
            WaitFor::Semaphore { semaphore, timeout } => {
                if Self::acquire(world, &semaphore) {
                    self.schedule(world, entry, timeout, Some(semaphore))
                } else {
                    debug!(
                        object = ?semaphore.object,
                        attr = %semaphore.attr,
                        "Semaphore already notified; running immediately"
                    );
                    self.schedule(world, entry, None, None)
                }
            }
        };
        Ok(handle)
    }

    /// Count one more waiter on the semaphore. False if the counter is still not positive
    /// afterwards, meaning notifies arrived ahead of the wait and it need not block.
    pub fn acquire(world: &mut dyn WorldState, semaphore: &Semaphore) -> bool {
        add_to(world, &semaphore.object, &semaphore.attr, 1) > 0
    }

    /// Put an entry into the scheduler.
    ///
    /// Without a semaphore it runs at `due`, or straight away if there is none. With a semaphore
    /// it is parked as a semaphore wait; `due` is then its timeout.
    pub fn schedule(
        &mut self,
        world: &dyn WorldState,
        mut entry: QueueEntry,
        due: Option<SystemTime>,
        semaphore: Option<Semaphore>,
    ) -> TaskHandle {
        let priority = priority_for(world, &entry.enactor);
        entry.is_timed = due.is_some();
        if let Some(due) = due {
            entry.wait_until = due;
        }

        let Some(semaphore) = semaphore else {
            let payload = Routine::Queued {
                kind: QueuedKind::RunCommand,
                entry: Box::new(entry),
            };
            return match due {
                Some(due) => self.tasks.defer_at(due, priority, payload),
                None => self.tasks.defer_now(priority, payload),
            };
        };

        entry.semaphore = Some(semaphore);
        let (when, priority) = match due {
            Some(due) => (due, priority),
            None => (SystemTime::UNIX_EPOCH, Priority::Suspended),
        };
        self.tasks.defer_at(
            when,
            priority,
            Routine::Queued {
                kind: QueuedKind::SemaphoreTimeout,
                entry: Box::new(entry),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::MemoryWorld;
    use std::sync::Arc;
    use std::time::Duration;

    fn queue() -> CommandQueue {
        let mut config = Config::default();
        config.queue.machine_cost = 0;
        CommandQueue::new(Arc::new(config))
    }

    fn invocation(executor: Obj, enactor: Obj) -> Invocation<'static> {
        Invocation {
            executor,
            caller: executor,
            enactor,
            command: "think hi",
            args: &[],
            registers: &[],
        }
    }

    #[test]
    fn test_priority_follows_enactor() {
        let mut world = MemoryWorld::new();
        let player = world.add_player("alice", 100);
        let thing = world.add_thing("widget", player);
        let mut queue = queue();

        let by_player = queue
            .wait(&mut world, &invocation(thing, player), WaitFor::Immediate)
            .unwrap();
        let by_thing = queue
            .wait(&mut world, &invocation(thing, thing), WaitFor::Immediate)
            .unwrap();
        assert_eq!(queue.task_q().get(by_player).unwrap().priority, Priority::Player);
        assert_eq!(queue.task_q().get(by_thing).unwrap().priority, Priority::Object);
    }

    #[test]
    fn test_untimed_semaphore_is_suspended() {
        let mut world = MemoryWorld::new();
        let player = world.add_player("alice", 100);
        let mut queue = queue();
        let semaphore = Semaphore {
            object: player,
            attr: "SEMAPHORE".into(),
        };
        let handle = queue
            .wait(
                &mut world,
                &invocation(player, player),
                WaitFor::Semaphore {
                    semaphore,
                    timeout: None,
                },
            )
            .unwrap();
        let record = queue.task_q().get(handle).unwrap();
        assert_eq!(record.priority, Priority::Suspended);
        assert!(record.payload.is_semaphore_wait());
        assert_eq!(world.attr_get(&player, "SEMAPHORE").as_deref(), Some("1"));
    }

    #[test]
    fn test_over_notified_semaphore_runs_immediately() {
        let mut world = MemoryWorld::new();
        let player = world.add_player("alice", 100);
        world.attr_set(&player, "SEMAPHORE", "-1");
        let mut queue = queue();
        let deadline = SystemTime::UNIX_EPOCH + Duration::from_secs(5000);
        let handle = queue
            .wait(
                &mut world,
                &invocation(player, player),
                WaitFor::Semaphore {
                    semaphore: Semaphore {
                        object: player,
                        attr: "SEMAPHORE".into(),
                    },
                    timeout: Some(deadline),
                },
            )
            .unwrap();
        let record = queue.task_q().get(handle).unwrap();
        assert!(!record.payload.is_semaphore_wait());
        let entry = record.payload.entry().unwrap();
        assert!(!entry.is_timed);
        assert!(entry.semaphore.is_none());
        assert_eq!(world.attr_get(&player, "SEMAPHORE"), None);
    }

    #[test]
    fn test_wait_refused_while_interpretation_disabled() {
        let mut world = MemoryWorld::new();
        let player = world.add_player("alice", 100);
        let mut queue = queue();
        queue.set_interpretation_enabled(false);
        assert_eq!(
            queue.wait(&mut world, &invocation(player, player), WaitFor::Immediate),
            Err(QueueError::InterpretationDisabled)
        );
        assert_eq!(world.balance(&player), 100);
    }
}
