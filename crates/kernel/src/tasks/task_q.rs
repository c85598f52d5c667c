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

//! The ordered store of deferred work.
//!
//! Tasks live in a handle-keyed arena. Ordered indexes sit beside it: the full schedule, the
//! tasks that could still become ready by time, and the tasks already marked ready. All are
//! keyed by (due time ascending, priority descending, registration order), so the first key of
//! an index is always its most-ready task. Suspended tasks are only ever in the schedule.
//!
//! Traversals walk a snapshot of handles rather than a live iterator, so a visitor may remove
//! or reschedule the record it is looking at without disturbing the walk.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::hash::BuildHasherDefault;
use std::time::SystemTime;

use ahash::AHasher;
use strum::Display;

/// Scheduling tier, lowest to highest.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Display)]
pub enum Priority {
    /// Never becomes ready by the passage of time alone.
    Suspended,
    Object,
    Player,
    /// Server housekeeping, above anything a user can queue.
    System,
}

impl Priority {
    /// Gate under which every queued command may run.
    pub const DEQUEUE_ENABLED: Priority = Priority::Object;
    /// Gate under which only system dispatches run.
    pub const DEQUEUE_DISABLED: Priority = Priority::System;
}

/// Stable name for a registered task. Handles are never reused, and their order is the order
/// of registration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskHandle(u64);

#[derive(Debug)]
pub struct TaskRecord<T> {
    pub when: SystemTime,
    pub priority: Priority,
    pub payload: T,
}

/// What a traversal visitor wants done with the record it was just shown.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Visit {
    Continue,
    /// Unlink and drop the record.
    Remove,
    /// The visitor changed `when` or `priority`; put the record back in order.
    Update,
    /// End the traversal now.
    Stop,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
struct OrderKey {
    when: SystemTime,
    priority: Reverse<Priority>,
    handle: TaskHandle,
}

#[derive(Debug)]
struct Slot<T> {
    record: TaskRecord<T>,
    key: OrderKey,
    ready: bool,
}

pub struct TaskQ<T> {
    slots: HashMap<TaskHandle, Slot<T>, BuildHasherDefault<AHasher>>,
    schedule: BTreeSet<OrderKey>,
    pending: BTreeSet<OrderKey>,
    ready: BTreeSet<OrderKey>,
    next_handle: u64,
    gate: Priority,
}

impl<T> Default for TaskQ<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQ<T> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::default(),
            schedule: BTreeSet::new(),
            pending: BTreeSet::new(),
            ready: BTreeSet::new(),
            next_handle: 0,
            gate: Priority::DEQUEUE_ENABLED,
        }
    }

    /// Register a task to become ready once `when` has passed.
    pub fn defer_at(&mut self, when: SystemTime, priority: Priority, payload: T) -> TaskHandle {
        let handle = TaskHandle(self.next_handle);
        self.next_handle += 1;
        let key = OrderKey {
            when,
            priority: Reverse(priority),
            handle,
        };
        self.schedule.insert(key);
        if priority != Priority::Suspended {
            self.pending.insert(key);
        }
        self.slots.insert(
            handle,
            Slot {
                record: TaskRecord {
                    when,
                    priority,
                    payload,
                },
                key,
                ready: false,
            },
        );
        handle
    }

    /// Register a task that is due immediately. It sorts ahead of anything with a real due time.
    pub fn defer_now(&mut self, priority: Priority, payload: T) -> TaskHandle {
        self.defer_at(SystemTime::UNIX_EPOCH, priority, payload)
    }

    pub fn gate(&self) -> Priority {
        self.gate
    }

    /// Tasks below the gate are never considered ready, however overdue they are.
    pub fn set_gate(&mut self, gate: Priority) {
        self.gate = gate;
    }

    fn eligible(&self, priority: Priority) -> bool {
        priority != Priority::Suspended && priority >= self.gate
    }

    /// Flag every task that is due by `now` and allowed through the gate as ready to run.
    /// Returns how many tasks were newly flagged.
    pub fn mark_ready(&mut self, now: SystemTime) -> usize {
        let due: Vec<OrderKey> = self
            .pending
            .iter()
            .take_while(|k| k.when <= now)
            .filter(|k| self.eligible(k.priority.0))
            .copied()
            .collect();
        for key in &due {
            self.pending.remove(key);
            self.ready.insert(*key);
            if let Some(slot) = self.slots.get_mut(&key.handle) {
                slot.ready = true;
            }
        }
        due.len()
    }

    /// Unlink the most-ready task, if any. Tasks that were marked ready before the gate was
    /// raised above them lose their ready flag instead of being returned.
    pub fn pop_ready(&mut self) -> Option<(TaskHandle, TaskRecord<T>)> {
        while let Some(key) = self.ready.pop_first() {
            if !self.eligible(key.priority.0) {
                if let Some(slot) = self.slots.get_mut(&key.handle) {
                    slot.ready = false;
                    self.pending.insert(key);
                }
                continue;
            }
            self.schedule.remove(&key);
            if let Some(slot) = self.slots.remove(&key.handle) {
                return Some((key.handle, slot.record));
            }
        }
        None
    }

    /// Visit every task in schedule order, ready or not.
    pub fn traverse_ordered<F>(&mut self, visitor: F)
    where
        F: FnMut(&mut TaskRecord<T>) -> Visit,
    {
        let handles: Vec<TaskHandle> = self.schedule.iter().map(|k| k.handle).collect();
        self.visit(handles, visitor);
    }

    /// Visit every task in no particular order. Cheaper than `traverse_ordered` when order
    /// does not matter.
    pub fn traverse_unordered<F>(&mut self, visitor: F)
    where
        F: FnMut(&mut TaskRecord<T>) -> Visit,
    {
        let handles: Vec<TaskHandle> = self.slots.keys().copied().collect();
        self.visit(handles, visitor);
    }

    fn visit<F>(&mut self, handles: Vec<TaskHandle>, mut visitor: F)
    where
        F: FnMut(&mut TaskRecord<T>) -> Visit,
    {
        for handle in handles {
            let Some(slot) = self.slots.get_mut(&handle) else {
                continue;
            };
            match visitor(&mut slot.record) {
                Visit::Continue => {}
                Visit::Remove => {
                    self.remove(handle);
                }
                Visit::Update => self.reindex(handle),
                Visit::Stop => break,
            }
        }
    }

    /// Read-only walk in schedule order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &TaskRecord<T>> + '_ {
        self.schedule
            .iter()
            .filter_map(|k| self.slots.get(&k.handle).map(|slot| &slot.record))
    }

    pub fn get(&self, handle: TaskHandle) -> Option<&TaskRecord<T>> {
        self.slots.get(&handle).map(|slot| &slot.record)
    }

    pub fn is_ready(&self, handle: TaskHandle) -> bool {
        self.slots.get(&handle).is_some_and(|slot| slot.ready)
    }

    /// Unlink a task by handle and give it back.
    pub fn remove(&mut self, handle: TaskHandle) -> Option<TaskRecord<T>> {
        let slot = self.slots.remove(&handle)?;
        self.schedule.remove(&slot.key);
        if slot.ready {
            self.ready.remove(&slot.key);
        } else {
            self.pending.remove(&slot.key);
        }
        Some(slot.record)
    }

    fn reindex(&mut self, handle: TaskHandle) {
        let Some(slot) = self.slots.get_mut(&handle) else {
            return;
        };
        self.schedule.remove(&slot.key);
        if slot.ready {
            self.ready.remove(&slot.key);
            slot.ready = false;
        } else {
            self.pending.remove(&slot.key);
        }
        slot.key = OrderKey {
            when: slot.record.when,
            priority: Reverse(slot.record.priority),
            handle,
        };
        self.schedule.insert(slot.key);
        if slot.record.priority != Priority::Suspended {
            self.pending.insert(slot.key);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + secs)
    }

    fn drain(q: &mut TaskQ<&'static str>, max: usize) -> Vec<&'static str> {
        let mut ran = vec![];
        while ran.len() < max {
            let Some((_, record)) = q.pop_ready() else {
                break;
            };
            ran.push(record.payload);
        }
        ran
    }

    #[test]
    fn test_nothing_ready_before_due() {
        let mut q = TaskQ::new();
        q.defer_at(at(10), Priority::Player, "later");
        assert_eq!(q.mark_ready(at(5)), 0);
        assert!(drain(&mut q, 10).is_empty());
        assert_eq!(q.len(), 1);

        assert_eq!(q.mark_ready(at(10)), 1);
        assert_eq!(drain(&mut q, 10), vec!["later"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_run_order_time_then_priority() {
        let mut q = TaskQ::new();
        q.defer_at(at(3), Priority::Player, "t3-player");
        q.defer_at(at(1), Priority::Object, "t1-object");
        q.defer_at(at(1), Priority::Player, "t1-player");
        q.defer_at(at(2), Priority::Object, "t2-object");
        q.mark_ready(at(10));
        assert_eq!(
            drain(&mut q, 10),
            vec!["t1-player", "t1-object", "t2-object", "t3-player"]
        );
    }

    #[test]
    fn test_pop_ready_is_bounded() {
        let mut q = TaskQ::new();
        for (i, name) in ["a", "b", "c", "d"].into_iter().enumerate() {
            q.defer_at(at(i as u64), Priority::Object, name);
        }
        q.mark_ready(at(10));
        assert_eq!(drain(&mut q, 2), vec!["a", "b"]);
        assert_eq!(q.ready_len(), 2);
        assert_eq!(drain(&mut q, 5), vec!["c", "d"]);
    }

    #[test]
    fn test_equal_keys_run_in_registration_order() {
        let mut q = TaskQ::new();
        q.defer_now(Priority::Object, "first");
        q.defer_now(Priority::Object, "second");
        q.defer_now(Priority::Player, "player");
        q.mark_ready(at(0));
        assert_eq!(drain(&mut q, 10), vec!["player", "first", "second"]);
    }

    #[test]
    fn test_suspended_never_ready() {
        let mut q = TaskQ::new();
        q.defer_at(at(0), Priority::Suspended, "sleeper");
        q.set_gate(Priority::Suspended);
        assert_eq!(q.mark_ready(at(1_000_000)), 0);
        assert!(drain(&mut q, 10).is_empty());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_gate_holds_back_lower_tiers() {
        let mut q = TaskQ::new();
        q.defer_at(at(0), Priority::Object, "object");
        q.defer_at(at(0), Priority::System, "system");
        q.set_gate(Priority::DEQUEUE_DISABLED);
        q.mark_ready(at(5));
        assert_eq!(drain(&mut q, 10), vec!["system"]);

        q.set_gate(Priority::DEQUEUE_ENABLED);
        q.mark_ready(at(5));
        assert_eq!(drain(&mut q, 10), vec!["object"]);
    }

    #[test]
    fn test_raising_gate_unreadies_marked_tasks() {
        let mut q = TaskQ::new();
        let h = q.defer_at(at(0), Priority::Object, "object");
        q.mark_ready(at(1));
        assert!(q.is_ready(h));
        q.set_gate(Priority::Player);
        assert!(drain(&mut q, 10).is_empty());
        assert!(!q.is_ready(h));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_mark_ready_scans_only_pending() {
        let mut q = TaskQ::new();
        let sleeper = q.defer_at(at(0), Priority::Suspended, "sleeper");
        q.defer_at(at(0), Priority::Object, "due");
        q.defer_at(at(50), Priority::Object, "later");
        assert_eq!(q.pending.len(), 2);

        assert_eq!(q.mark_ready(at(1)), 1);
        assert_eq!(q.pending.len(), 1);
        assert_eq!(q.mark_ready(at(1)), 0);
        assert_eq!(q.ready_len(), 1);

        // Waking the sleeper puts it back in line behind the already-ready task.
        q.traverse_unordered(|record| {
            if record.payload == "sleeper" {
                record.priority = Priority::Player;
                Visit::Update
            } else {
                Visit::Continue
            }
        });
        assert!(!q.is_ready(sleeper));
        assert_eq!(q.pending.len(), 2);
        assert_eq!(q.mark_ready(at(1)), 1);
        assert_eq!(drain(&mut q, 10), vec!["sleeper", "due"]);

        // Held back by the gate after being marked: eligible again once the gate drops.
        q.mark_ready(at(60));
        q.set_gate(Priority::System);
        assert!(drain(&mut q, 10).is_empty());
        assert_eq!(q.pending.len(), 1);
        q.set_gate(Priority::DEQUEUE_ENABLED);
        assert_eq!(q.mark_ready(at(60)), 1);
        assert_eq!(drain(&mut q, 10), vec!["later"]);
        assert!(q.pending.is_empty());
    }

    #[test]
    fn test_traverse_remove_current() {
        let mut q = TaskQ::new();
        q.defer_at(at(1), Priority::Object, "keep");
        q.defer_at(at(2), Priority::Object, "drop");
        q.defer_at(at(3), Priority::Object, "keep-too");
        let mut seen = vec![];
        q.traverse_ordered(|record| {
            seen.push(record.payload);
            if record.payload == "drop" {
                Visit::Remove
            } else {
                Visit::Continue
            }
        });
        assert_eq!(seen, vec!["keep", "drop", "keep-too"]);
        let left: Vec<_> = q.iter_ordered().map(|r| r.payload).collect();
        assert_eq!(left, vec!["keep", "keep-too"]);
    }

    #[test]
    fn test_traverse_update_current_resorts_and_visits_once() {
        let mut q = TaskQ::new();
        q.defer_at(at(1), Priority::Suspended, "waiter");
        q.defer_at(at(5), Priority::Object, "timer");
        let mut visits = 0;
        q.traverse_ordered(|record| {
            visits += 1;
            if record.payload == "waiter" {
                record.when = at(9);
                record.priority = Priority::Player;
                return Visit::Update;
            }
            Visit::Continue
        });
        assert_eq!(visits, 2);
        let order: Vec<_> = q.iter_ordered().map(|r| r.payload).collect();
        assert_eq!(order, vec!["timer", "waiter"]);

        q.mark_ready(at(9));
        assert_eq!(drain(&mut q, 10), vec!["timer", "waiter"]);
    }

    #[test]
    fn test_update_clears_ready_flag() {
        let mut q = TaskQ::new();
        let h = q.defer_at(at(1), Priority::Object, "x");
        q.mark_ready(at(1));
        assert!(q.is_ready(h));
        q.traverse_unordered(|record| {
            record.when = at(50);
            Visit::Update
        });
        assert!(!q.is_ready(h));
        q.mark_ready(at(10));
        assert!(drain(&mut q, 10).is_empty());
    }

    #[test]
    fn test_traverse_stop() {
        let mut q = TaskQ::new();
        for i in 0..5 {
            q.defer_at(at(i), Priority::Object, "x");
        }
        let mut visits = 0;
        q.traverse_ordered(|_| {
            visits += 1;
            if visits == 2 { Visit::Stop } else { Visit::Continue }
        });
        assert_eq!(visits, 2);
        assert_eq!(q.len(), 5);
    }

    #[test]
    fn test_remove_ready_task_by_handle() {
        let mut q = TaskQ::new();
        let h = q.defer_at(at(0), Priority::Object, "gone");
        q.defer_at(at(0), Priority::Object, "stays");
        q.mark_ready(at(1));
        let removed = q.remove(h).map(|r| r.payload);
        assert_eq!(removed, Some("gone"));
        assert!(q.get(h).is_none());
        assert_eq!(drain(&mut q, 10), vec!["stays"]);
        assert!(q.remove(h).is_none());
    }
}
