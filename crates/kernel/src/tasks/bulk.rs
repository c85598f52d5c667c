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

//! Halting and notifying: operations that sweep the whole scheduler store.

use std::time::SystemTime;

use strum::Display;
use tracing::{debug, info};
use waitq_common::Obj;
use waitq_common::model::{QUEUE_COUNT_ATTR, WorldState};
use waitq_common::util::parse_counter;

use crate::tasks::command_queue::CommandQueue;
use crate::tasks::queue_entry::QueueEntry;
use crate::tasks::task_q::{TaskRecord, Visit};
use crate::tasks::wait::priority_for;
use crate::tasks::{QueuedKind, Routine, add_to};

/// Selects queue entries by owner and by executor. `None` matches anything.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct QueueFilter {
    pub owner: Option<Obj>,
    pub object: Option<Obj>,
}

impl QueueFilter {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn owned_by(owner: Obj) -> Self {
        Self {
            owner: Some(owner),
            object: None,
        }
    }

    pub fn run_by(object: Obj) -> Self {
        Self {
            owner: None,
            object: Some(object),
        }
    }

    pub fn matches(&self, world: &dyn WorldState, entry: &QueueEntry) -> bool {
        if let Some(owner) = self.owner
            && world.owner_of(&entry.executor) != owner
        {
            return false;
        }
        self.object.is_none_or(|object| object == entry.executor)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum NotifyMode {
    /// Throw every matching waiter away without running it.
    Drain,
    /// Release the earliest `count` waiters.
    First,
    /// As `First`, but nobody is told.
    Quiet,
    /// Release every waiter whatever the count.
    All,
}

impl NotifyMode {
    fn is_bounded(&self) -> bool {
        matches!(self, NotifyMode::First | NotifyMode::Quiet)
    }
}

fn refund(world: &mut dyn WorldState, owner: &Obj, entries: i64, wait_cost: i64) {
    world.credit(owner, wait_cost * entries);
    add_to(world, owner, QUEUE_COUNT_ATTR, -entries);
}

/// The semaphore wait in `record`, if it is waiting on `object` (and `attr`, unless that is a
/// wildcard).
fn waiting_on<'r>(
    record: &'r mut TaskRecord<Routine>,
    object: &Obj,
    attr: Option<&str>,
) -> Option<&'r mut QueueEntry> {
    let Routine::Queued {
        kind: QueuedKind::SemaphoreTimeout,
        entry,
    } = &mut record.payload
    else {
        return None;
    };
    let semaphore = entry.semaphore.as_ref()?;
    if semaphore.object != *object {
        return None;
    }
    if let Some(attr) = attr
        && !semaphore.attr.eq_ignore_ascii_case(attr)
    {
        return None;
    }
    Some(&mut **entry)
}

/// Turn a semaphore wait into a command that is due now.
fn release(world: &dyn WorldState, record: &mut TaskRecord<Routine>, now: SystemTime) {
    let Routine::Queued { kind, entry } = &mut record.payload else {
        return;
    };
    *kind = QueuedKind::RunCommand;
    entry.semaphore = None;
    record.priority = priority_for(world, &entry.enactor);
    record.when = now;
}

impl CommandQueue {
    /// Cancel every queued command the filter selects, refunding the cost and the quota slot of
    /// each. Semaphore waits also give back their count on the semaphore. Returns the number
    /// cancelled.
    pub fn halt(&mut self, world: &mut dyn WorldState, filter: &QueueFilter) -> usize {
        let wait_cost = self.config().queue.wait_cost;
        let mut removed = 0;
        // Refunds are gathered per owner and paid out whenever the owner changes.
        let mut batch: Option<(Obj, i64)> = None;
        self.tasks.traverse_unordered(|record| {
            let Routine::Queued { entry, .. } = &record.payload else {
                return Visit::Continue;
            };
            if !filter.matches(world, entry) {
                return Visit::Continue;
            }
            let owner = world.billing_owner(&entry.executor);
            batch = match batch {
                Some((current, entries)) if current == owner => Some((current, entries + 1)),
                previous => {
                    if let Some((previous, entries)) = previous {
                        refund(world, &previous, entries, wait_cost);
                    }
                    Some((owner, 1))
                }
            };
            if let Some(semaphore) = &entry.semaphore {
                add_to(world, &semaphore.object, &semaphore.attr, -1);
            }
            removed += 1;
            Visit::Remove
        });
        if let Some((owner, entries)) = batch {
            refund(world, &owner, entries, wait_cost);
        }
        if removed > 0 {
            info!(?filter, removed, "Halted queue entries");
        }
        removed
    }

    /// Release or discard waiters on a semaphore. `attr` of `None` matches any attribute on
    /// the object and leaves every counter alone.
    ///
    /// The counter is read first; if it shows no waiters nothing is traversed. Afterwards the
    /// bounded modes take `count` off the counter, whether or not that many waiters were found,
    /// and the unbounded modes clear it. Returns how many waiters were released or drained.
    ///
    /// Waiters are taken in schedule order. Untimed waiters are keyed at the epoch, so they are
    /// released ahead of timed waiters on the same semaphore even if those registered first.
    pub fn notify(
        &mut self,
        world: &mut dyn WorldState,
        object: Obj,
        attr: Option<&str>,
        mode: NotifyMode,
        count: i64,
        now: SystemTime,
    ) -> usize {
        let waiting = match attr {
            Some(attr) => world.attr_get(&object, attr).map_or(0, |v| parse_counter(&v)),
            None => 1,
        };

        let wait_cost = self.config().queue.wait_cost;
        let mut done: i64 = 0;
        if waiting > 0 {
            if mode.is_bounded() {
                self.tasks.traverse_ordered(|record| {
                    if done >= count {
                        return Visit::Stop;
                    }
                    if waiting_on(record, &object, attr).is_none() {
                        return Visit::Continue;
                    }
                    done += 1;
                    release(world, record, now);
                    Visit::Update
                });
            } else {
                self.tasks.traverse_unordered(|record| {
                    let Some(entry) = waiting_on(record, &object, attr) else {
                        return Visit::Continue;
                    };
                    done += 1;
                    if mode == NotifyMode::Drain {
                        let owner = world.billing_owner(&entry.executor);
                        refund(world, &owner, 1, wait_cost);
                        return Visit::Remove;
                    }
                    release(world, record, now);
                    Visit::Update
                });
            }
        }

        if let Some(attr) = attr {
            if mode.is_bounded() {
                add_to(world, &object, attr, -count);
            } else {
                world.attr_clear(&object, attr);
            }
        }
        debug!(?object, ?attr, %mode, count, done, "Notified semaphore");
        done as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tasks::queue_entry::{Invocation, Semaphore};
    use crate::tasks::task_q::Priority;
    use crate::tasks::wait::WaitFor;
    use crate::testing::MemoryWorld;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn queue() -> CommandQueue {
        let mut config = Config::default();
        config.queue.machine_cost = 0;
        config.queue.wait_cost = 1;
        CommandQueue::new(Arc::new(config))
    }

    fn wait_on(
        queue: &mut CommandQueue,
        world: &mut MemoryWorld,
        executor: Obj,
        command: &str,
        semaphore: Obj,
    ) {
        queue
            .wait(
                world,
                &Invocation {
                    executor,
                    caller: executor,
                    enactor: executor,
                    command,
                    args: &[],
                    registers: &[],
                },
                WaitFor::Semaphore {
                    semaphore: Semaphore {
                        object: semaphore,
                        attr: "SEMAPHORE".into(),
                    },
                    timeout: None,
                },
            )
            .unwrap();
    }

    fn commands(queue: &CommandQueue, semaphores: bool) -> Vec<String> {
        queue
            .task_q()
            .iter_ordered()
            .filter(|r| r.payload.is_semaphore_wait() == semaphores)
            .filter_map(|r| r.payload.entry().map(|e| e.command().to_string()))
            .collect()
    }

    #[test]
    fn test_halt_batches_refunds_per_owner() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let bob = world.add_player("bob", 10);
        let gadget = world.add_thing("gadget", alice);
        let mut queue = queue();
        for executor in [alice, gadget, bob, alice] {
            queue
                .wait(
                    &mut world,
                    &Invocation {
                        executor,
                        caller: executor,
                        enactor: executor,
                        command: "think x",
                        args: &[],
                        registers: &[],
                    },
                    WaitFor::Until(at(100)),
                )
                .unwrap();
        }
        assert_eq!(world.balance(&alice), 7);
        assert_eq!(world.attr_get(&alice, "QUEUE").as_deref(), Some("3"));

        assert_eq!(queue.halt(&mut world, &QueueFilter::owned_by(alice)), 3);
        assert_eq!(world.balance(&alice), 10);
        assert_eq!(world.attr_get(&alice, "QUEUE"), None);
        assert_eq!(world.balance(&bob), 9);
        assert_eq!(queue.pending_commands(), 1);

        // Nothing left to halt for alice.
        assert_eq!(queue.halt(&mut world, &QueueFilter::owned_by(alice)), 0);
        assert_eq!(world.balance(&alice), 10);
    }

    #[test]
    fn test_halt_semaphore_wait_releases_count() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        wait_on(&mut queue, &mut world, alice, "a", alice);
        wait_on(&mut queue, &mut world, alice, "b", alice);
        assert_eq!(world.attr_get(&alice, "SEMAPHORE").as_deref(), Some("2"));
        assert_eq!(queue.halt(&mut world, &QueueFilter::run_by(alice)), 2);
        assert_eq!(world.attr_get(&alice, "SEMAPHORE"), None);
    }

    #[test]
    fn test_notify_first_releases_earliest() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        for command in ["t1", "t2", "t3"] {
            wait_on(&mut queue, &mut world, alice, command, alice);
        }
        let done = queue.notify(
            &mut world,
            alice,
            Some("SEMAPHORE"),
            NotifyMode::First,
            2,
            at(0),
        );
        assert_eq!(done, 2);
        assert_eq!(commands(&queue, false), vec!["t1", "t2"]);
        assert_eq!(commands(&queue, true), vec!["t3"]);
        assert_eq!(world.attr_get(&alice, "SEMAPHORE").as_deref(), Some("1"));

        let released: Vec<_> = queue
            .task_q()
            .iter_ordered()
            .filter(|r| !r.payload.is_semaphore_wait())
            .map(|r| (r.when, r.priority))
            .collect();
        assert_eq!(
            released,
            vec![(at(0), Priority::Player), (at(0), Priority::Player)]
        );
    }

    #[test]
    fn test_bounded_notify_decrements_requested_count() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        wait_on(&mut queue, &mut world, alice, "only", alice);
        let done = queue.notify(
            &mut world,
            alice,
            Some("SEMAPHORE"),
            NotifyMode::Quiet,
            3,
            at(0),
        );
        assert_eq!(done, 1);
        assert_eq!(world.attr_get(&alice, "SEMAPHORE").as_deref(), Some("-2"));
    }

    #[test]
    fn test_notify_first_prefers_untimed_waiters() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        queue
            .wait(
                &mut world,
                &Invocation {
                    executor: alice,
                    caller: alice,
                    enactor: alice,
                    command: "timed",
                    args: &[],
                    registers: &[],
                },
                WaitFor::Semaphore {
                    semaphore: Semaphore {
                        object: alice,
                        attr: "SEMAPHORE".into(),
                    },
                    timeout: Some(at(60)),
                },
            )
            .unwrap();
        wait_on(&mut queue, &mut world, alice, "untimed", alice);

        let done = queue.notify(
            &mut world,
            alice,
            Some("SEMAPHORE"),
            NotifyMode::First,
            1,
            at(0),
        );
        assert_eq!(done, 1);
        assert_eq!(commands(&queue, false), vec!["untimed"]);
        assert_eq!(commands(&queue, true), vec!["timed"]);
    }

    #[test]
    fn test_notify_without_waiters_skips_traversal_but_counts() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        let done = queue.notify(
            &mut world,
            alice,
            Some("SEMAPHORE"),
            NotifyMode::First,
            1,
            at(0),
        );
        assert_eq!(done, 0);
        assert_eq!(world.attr_get(&alice, "SEMAPHORE").as_deref(), Some("-1"));
    }

    #[test]
    fn test_drain_refunds_and_clears() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        wait_on(&mut queue, &mut world, alice, "a", alice);
        wait_on(&mut queue, &mut world, alice, "b", alice);
        assert_eq!(world.balance(&alice), 8);
        let done = queue.notify(
            &mut world,
            alice,
            Some("SEMAPHORE"),
            NotifyMode::Drain,
            1,
            at(0),
        );
        assert_eq!(done, 2);
        assert!(queue.task_q().is_empty());
        assert_eq!(world.balance(&alice), 10);
        assert_eq!(world.attr_get(&alice, "SEMAPHORE"), None);
        assert_eq!(world.attr_get(&alice, "QUEUE"), None);
    }

    #[test]
    fn test_notify_all_with_wildcard_attribute_leaves_counters() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        wait_on(&mut queue, &mut world, alice, "a", alice);
        wait_on(&mut queue, &mut world, alice, "b", alice);
        let done = queue.notify(&mut world, alice, None, NotifyMode::All, 1, at(0));
        assert_eq!(done, 2);
        assert!(commands(&queue, true).is_empty());
        assert_eq!(world.attr_get(&alice, "SEMAPHORE").as_deref(), Some("2"));
    }
}
