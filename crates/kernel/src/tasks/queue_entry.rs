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

use std::ops::Range;
use std::time::SystemTime;

use rand::Rng;
use tracing::{debug, warn};
use waitq_common::Obj;
use waitq_common::model::{QUEUE_COUNT_ATTR, QUEUE_MAX_ATTR, WorldState};
use waitq_common::tasks::QueueError;

use crate::tasks::bulk::QueueFilter;
use crate::tasks::command_queue::CommandQueue;
use crate::tasks::{MAX_GLOBAL_REGS, NUM_ENV_VARS, add_to};

/// The counter a semaphore wait is registered against.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Semaphore {
    pub object: Obj,
    pub attr: String,
}

/// Who wants what run, before it has been paid for.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub executor: Obj,
    pub caller: Obj,
    pub enactor: Obj,
    pub command: &'a str,
    /// Positional arguments; anything past `NUM_ENV_VARS` is dropped.
    pub args: &'a [String],
    /// Scratch registers to restore when the command runs. Empty registers are not stored.
    pub registers: &'a [String],
}

/// One pending command invocation.
///
/// The command text, arguments and saved registers all live in one buffer owned by the entry;
/// the accessors hand out slices of it. Dropping the entry is the only way that buffer goes away.
#[derive(Debug)]
pub struct QueueEntry {
    pub executor: Obj,
    pub caller: Obj,
    pub enactor: Obj,
    /// Whether `wait_until` means anything.
    pub is_timed: bool,
    pub wait_until: SystemTime,
    pub semaphore: Option<Semaphore>,
    text: Box<str>,
    command: Range<usize>,
    nargs: usize,
    args: [Option<Range<usize>>; NUM_ENV_VARS],
    registers: [Option<Range<usize>>; MAX_GLOBAL_REGS],
}

impl QueueEntry {
    /// Copy everything the invocation refers to into a single buffer.
    pub fn pack(invocation: &Invocation<'_>) -> Self {
        let nargs = invocation.args.len().min(NUM_ENV_VARS);
        let args = &invocation.args[..nargs];
        let registers = &invocation.registers[..invocation.registers.len().min(MAX_GLOBAL_REGS)];

        let size = invocation.command.len()
            + args.iter().map(String::len).sum::<usize>()
            + registers.iter().map(String::len).sum::<usize>();
        let mut text = String::with_capacity(size);
        let mut append = |s: &str| {
            let start = text.len();
            text.push_str(s);
            start..text.len()
        };

        let command = append(invocation.command);
        let mut arg_slots: [Option<Range<usize>>; NUM_ENV_VARS] = Default::default();
        for (slot, arg) in arg_slots.iter_mut().zip(args) {
            *slot = Some(append(arg));
        }
        let mut register_slots: [Option<Range<usize>>; MAX_GLOBAL_REGS] = Default::default();
        for (slot, register) in register_slots.iter_mut().zip(registers) {
            if !register.is_empty() {
                *slot = Some(append(register));
            }
        }

        Self {
            executor: invocation.executor,
            caller: invocation.caller,
            enactor: invocation.enactor,
            is_timed: false,
            wait_until: SystemTime::UNIX_EPOCH,
            semaphore: None,
            text: text.into_boxed_str(),
            command,
            nargs,
            args: arg_slots,
            registers: register_slots,
        }
    }

    pub fn command(&self) -> &str {
        &self.text[self.command.clone()]
    }

    pub fn nargs(&self) -> usize {
        self.nargs
    }

    pub fn arg(&self, i: usize) -> Option<&str> {
        let range = self.args.get(i)?.as_ref()?;
        Some(&self.text[range.clone()])
    }

    /// The stored arguments in slot order.
    pub fn args(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.nargs).filter_map(|i| self.arg(i))
    }

    pub fn register(&self, i: usize) -> Option<&str> {
        let range = self.registers.get(i)?.as_ref()?;
        Some(&self.text[range.clone()])
    }

    /// Load the saved registers into `target`. Slots with nothing saved are emptied.
    pub fn restore_registers(&self, target: &mut [String; MAX_GLOBAL_REGS]) {
        for (i, register) in target.iter_mut().enumerate() {
            register.clear();
            if let Some(saved) = self.register(i) {
                register.push_str(saved);
            }
        }
    }

    /// Size of the single text buffer.
    pub fn storage_len(&self) -> usize {
        self.text.len()
    }
}

impl CommandQueue {
    /// Most entries `owner` may have outstanding at once.
    pub fn queue_max(&self, world: &dyn WorldState, owner: &Obj) -> i64 {
        if let Some(max) = world
            .attr_get(owner, QUEUE_MAX_ATTR)
            .filter(|s| !s.trim().is_empty())
        {
            return waitq_common::util::parse_counter(&max).max(0);
        }
        if world.is_privileged(owner) {
            return world.object_count() as i64 + 1;
        }
        self.config().queue.queue_max
    }

    /// Charge for and pack a new entry.
    ///
    /// Nothing is allocated unless every check passes. Exceeding the owner's quota halts the
    /// executor and cancels everything the owner has queued.
    pub fn create_entry(
        &mut self,
        world: &mut dyn WorldState,
        invocation: &Invocation<'_>,
    ) -> Result<QueueEntry, QueueError> {
        let executor = invocation.executor;
        if world.is_halted(&executor) {
            return Err(QueueError::ExecutorHalted);
        }

        let config = &self.config().queue;
        let wait_cost = config.wait_cost;
        let mut cost = wait_cost;
        if config.machine_cost > 0 && rand::rng().random_range(0..config.machine_cost) == 0 {
            cost += 1;
        }
        let owner = world.billing_owner(&executor);
        if !world.debit(&owner, cost) {
            world.notify(&owner, &QueueError::InsufficientFunds.to_string());
            return Err(QueueError::InsufficientFunds);
        }

        let max = self.queue_max(world, &owner);
        let outstanding = add_to(world, &owner, QUEUE_COUNT_ATTR, 1);
        if outstanding > max {
            warn!(?owner, ?executor, outstanding, max, "Runaway queue; halting owner");
            add_to(world, &owner, QUEUE_COUNT_ATTR, -1);
            world.credit(&owner, cost);
            world.notify(&owner, &QueueError::QuotaExceeded.to_string());
            self.halt(world, &QueueFilter::owned_by(owner));
            world.set_halted(&executor, true);
            return Err(QueueError::QuotaExceeded);
        }

        let entry = QueueEntry::pack(invocation);
        debug!(?executor, ?owner, cost, bytes = entry.storage_len(), "Queue entry created");
        Ok(entry)
    }
}
