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

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use strum::IntoEnumIterator;
use tracing::{debug, info, warn};
use waitq_common::tasks::SystemTask;

use crate::config::Config;
use crate::tasks::exec::ExecParams;
use crate::tasks::task_q::{Priority, TaskHandle, TaskQ, TaskRecord, Visit};
use crate::tasks::{QueuedKind, Routine, add_to};

/// The command queue and everything it needs to account for deferred work.
///
/// One of these is owned by whatever drives the server loop, and every queue operation goes
/// through it. The world, the interpreter and the execution context are passed in per call.
pub struct CommandQueue {
    config: Arc<Config>,
    pub(crate) tasks: TaskQ<Routine>,
    interpretation_enabled: bool,
}

/// Result of forcing a batch of ready entries through.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct KickOutcome {
    pub processed: usize,
    /// Automatic dequeueing was off; it was switched on for the duration of the kick.
    pub dequeue_was_disabled: bool,
}

impl CommandQueue {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            tasks: TaskQ::new(),
            interpretation_enabled: true,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read-only view of the scheduler store.
    pub fn task_q(&self) -> &TaskQ<Routine> {
        &self.tasks
    }

    pub fn interpretation_enabled(&self) -> bool {
        self.interpretation_enabled
    }

    /// While off, no new commands may be queued.
    pub fn set_interpretation_enabled(&mut self, enabled: bool) {
        self.interpretation_enabled = enabled;
    }

    pub fn dequeue_enabled(&self) -> bool {
        self.tasks.gate() <= Priority::DEQUEUE_ENABLED
    }

    /// Switch automatic running of queued commands on or off. System dispatches run either way.
    pub fn set_dequeue_enabled(&mut self, enabled: bool) {
        let gate = if enabled {
            Priority::DEQUEUE_ENABLED
        } else {
            Priority::DEQUEUE_DISABLED
        };
        info!(%gate, "Automatic dequeueing {}", if enabled { "enabled" } else { "disabled" });
        self.tasks.set_gate(gate);
    }

    /// Queue a system dispatch to run at `when`.
    pub fn defer_system(&mut self, when: SystemTime, task: SystemTask) -> TaskHandle {
        self.tasks.defer_at(when, Priority::System, Routine::System(task))
    }

    /// Register every periodic dispatch that has a non-zero interval, each one interval from now.
    pub fn schedule_system_tasks(&mut self, now: SystemTime) -> usize {
        let mut scheduled = 0;
        for task in SystemTask::iter() {
            if let Some(interval) = self.config.queue.interval_of(task) {
                self.defer_system(now + interval, task);
                scheduled += 1;
            }
        }
        scheduled
    }

    /// One turn of the server loop: mark what is due and run a chunk of it.
    pub fn tick(&mut self, exec: &mut ExecParams<'_>, now: SystemTime) -> usize {
        self.tasks.mark_ready(now);
        self.run_ready(exec, self.config.queue.queue_chunk, now)
    }

    /// Run up to `max` entries already marked ready, most-ready first.
    pub fn run_ready(&mut self, exec: &mut ExecParams<'_>, max: usize, now: SystemTime) -> usize {
        let mut ran = 0;
        while ran < max {
            let Some((_, record)) = self.tasks.pop_ready() else {
                break;
            };
            self.dispatch(exec, record, now);
            ran += 1;
        }
        ran
    }

    fn dispatch(
        &mut self,
        exec: &mut ExecParams<'_>,
        record: TaskRecord<Routine>,
        now: SystemTime,
    ) {
        match record.payload {
            Routine::Queued {
                kind: QueuedKind::RunCommand,
                entry,
            } => self.run_entry(exec, *entry),
            Routine::Queued {
                kind: QueuedKind::SemaphoreTimeout,
                mut entry,
            } => {
                if let Some(semaphore) = entry.semaphore.take() {
                    debug!(
                        object = ?semaphore.object,
                        attr = %semaphore.attr,
                        "Semaphore wait timed out"
                    );
                    add_to(exec.world, &semaphore.object, &semaphore.attr, -1);
                }
                self.run_entry(exec, *entry);
            }
            Routine::System(task) => {
                debug!(%task, "System dispatch");
                exec.world.run_system_task(task);
                if let Some(interval) = self.config.queue.interval_of(task) {
                    self.defer_system(now + interval, task);
                }
            }
        }
    }

    /// Run up to `n` due entries right now, even if automatic dequeueing is off.
    pub fn kick(&mut self, exec: &mut ExecParams<'_>, n: usize, now: SystemTime) -> KickOutcome {
        let saved = self.tasks.gate();
        let dequeue_was_disabled = saved > Priority::DEQUEUE_ENABLED;
        if dequeue_was_disabled {
            warn!("Kicking the queue while automatic dequeueing is disabled");
            self.tasks.set_gate(Priority::DEQUEUE_ENABLED);
        }
        self.tasks.mark_ready(now);
        let processed = self.run_ready(exec, n, now);
        self.tasks.set_gate(saved);
        info!(processed, "Queue kicked");
        KickOutcome {
            processed,
            dequeue_was_disabled,
        }
    }

    /// Move every timed entry `secs` seconds earlier; negative values move them later.
    /// Returns how many entries moved.
    pub fn warp(&mut self, secs: i64) -> usize {
        let delta = Duration::from_secs(secs.unsigned_abs());
        let shift = |t: SystemTime| {
            if secs >= 0 {
                t.checked_sub(delta).unwrap_or(SystemTime::UNIX_EPOCH)
            } else {
                t.checked_add(delta).unwrap_or(t)
            }
        };
        let mut moved = 0;
        self.tasks.traverse_unordered(|record| {
            let Routine::Queued { entry, .. } = &mut record.payload else {
                return Visit::Continue;
            };
            if !entry.is_timed {
                return Visit::Continue;
            }
            entry.wait_until = shift(entry.wait_until);
            record.when = shift(record.when);
            moved += 1;
            Visit::Update
        });
        info!(secs, moved, "Wait queue warped");
        moved
    }

    /// Queued commands waiting to run, whether on a timer or a semaphore.
    pub fn pending_commands(&self) -> usize {
        self.tasks
            .iter_ordered()
            .filter(|record| record.payload.entry().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::exec::ExecContext;
    use crate::testing::{MemoryWorld, ScriptInterpreter};
    use pretty_assertions::assert_eq;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn test_system_tasks_recur() {
        let mut queue = CommandQueue::new(Arc::new(Config::default()));
        let mut world = MemoryWorld::new();
        let mut interpreter = ScriptInterpreter::default();
        let mut context = ExecContext::new();
        assert_eq!(queue.schedule_system_tasks(at(0)), 4);

        let mut exec = ExecParams {
            world: &mut world,
            interpreter: &mut interpreter,
            context: &mut context,
        };
        // Idle check and events are due after one minute; nothing else is.
        assert_eq!(queue.tick(&mut exec, at(60)), 2);
        assert_eq!(
            world.system_tasks_run(),
            vec![SystemTask::IdleCheck, SystemTask::CheckEvents]
        );
        // Both went back in for another minute.
        assert_eq!(queue.task_q().len(), 4);
        let due: Vec<_> = queue
            .task_q()
            .iter_ordered()
            .map(|r| r.when)
            .collect();
        assert_eq!(due, vec![at(120), at(120), at(600), at(3600)]);
    }

    #[test]
    fn test_dequeue_gate_still_runs_system_tasks() {
        let mut queue = CommandQueue::new(Arc::new(Config::default()));
        queue.set_dequeue_enabled(false);
        assert!(!queue.dequeue_enabled());
        queue.defer_system(at(0), SystemTask::DatabaseDump);

        let mut world = MemoryWorld::new();
        let mut interpreter = ScriptInterpreter::default();
        let mut context = ExecContext::new();
        let mut exec = ExecParams {
            world: &mut world,
            interpreter: &mut interpreter,
            context: &mut context,
        };
        assert_eq!(queue.tick(&mut exec, at(1)), 1);
        assert_eq!(world.system_tasks_run(), vec![SystemTask::DatabaseDump]);
    }
}
