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

//! Running a queued entry's command text.

use minstant::Instant;
use tracing::{debug, warn};
use waitq_common::Obj;
use waitq_common::model::{QUEUE_COUNT_ATTR, WorldState};

use crate::tasks::command_queue::CommandQueue;
use crate::tasks::queue_entry::QueueEntry;
use crate::tasks::{MAX_GLOBAL_REGS, add_to};
use crate::util::processor_usage;

/// Whether the rest of a command chain should go on.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum Flow {
    #[default]
    Continue,
    /// Abandon the remainder of the chain.
    Break,
}

/// What the interpreter hands back after running one command.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Processed {
    /// The command as actually executed, for logging.
    pub logged: String,
    pub flow: Flow,
}

/// One command to interpret.
#[derive(Debug, Clone, Copy)]
pub struct CommandCall<'a> {
    pub executor: Obj,
    pub caller: Obj,
    pub enactor: Obj,
    pub command: &'a str,
    pub args: &'a [&'a str],
}

/// The command interpreter the queue runs entries through.
///
/// Interpreters get the queue back so that a command may itself queue, halt or notify.
pub trait Interpreter {
    fn process_command(
        &mut self,
        queue: &mut CommandQueue,
        world: &mut dyn WorldState,
        context: &mut ExecContext,
        call: &CommandCall<'_>,
    ) -> Processed;
}

/// Per-thread execution state: scratch registers and the pipe buffers.
#[derive(Debug)]
pub struct ExecContext {
    pub registers: [String; MAX_GLOBAL_REGS],
    /// Output of the previous pipe stage.
    pub pipe_input: Option<String>,
    capture: Option<(Obj, String)>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecContext {
    pub fn new() -> Self {
        Self {
            registers: Default::default(),
            pipe_input: None,
            capture: None,
        }
    }

    /// True while a pipe stage is collecting output.
    pub fn in_pipe(&self) -> bool {
        self.capture.is_some()
    }

    /// Offer output meant for `who` to the pipe. Returns false if nothing is capturing it and
    /// it should be delivered normally.
    pub fn capture(&mut self, who: &Obj, text: &str) -> bool {
        match &mut self.capture {
            Some((target, buffer)) if target == who => {
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(text);
                true
            }
            _ => false,
        }
    }

    fn begin_pipe(&mut self, target: Obj) {
        self.capture = Some((target, String::new()));
    }

    fn end_pipe(&mut self) {
        self.pipe_input = self.capture.take().map(|(_, buffer)| buffer);
    }

    pub fn clear_registers(&mut self) {
        for register in &mut self.registers {
            register.clear();
        }
    }

    fn reset(&mut self) {
        self.clear_registers();
        self.pipe_input = None;
        self.capture = None;
    }
}

/// Everything the queue needs to run an entry, besides the queue itself.
pub struct ExecParams<'a> {
    pub world: &'a mut dyn WorldState,
    pub interpreter: &'a mut dyn Interpreter,
    pub context: &'a mut ExecContext,
}

/// Split off the first `;`-separated command. Separators inside `{}`, `[]` or `()`, or escaped
/// with `\` or `%`, don't count. The first command comes back trimmed; the remainder is `None`
/// when there was no separator.
pub fn split_command(text: &str) -> (&str, Option<&str>) {
    let mut closers: Vec<char> = vec![];
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' | '%' => escaped = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '(' => closers.push(')'),
            '}' | ']' | ')' => {
                if closers.last() == Some(&c) {
                    closers.pop();
                }
            }
            ';' if closers.is_empty() => return (text[..i].trim(), Some(&text[i + 1..])),
            _ => {}
        }
    }
    (text.trim(), None)
}

impl CommandQueue {
    /// Run an entry that has already been taken out of the scheduler, consuming it.
    ///
    /// If the executor is gone nothing runs. Otherwise the creation cost is refunded and the
    /// owner's outstanding count drops, then, unless the executor is halted, the saved registers
    /// are restored and the command chain runs. Registers are wiped afterwards either way.
    pub fn run_entry(&mut self, exec: &mut ExecParams<'_>, entry: QueueEntry) {
        let executor = entry.executor;
        if exec.world.valid(&executor) && !exec.world.is_going(&executor) {
            let owner = exec.world.billing_owner(&executor);
            exec.world.credit(&owner, self.config().queue.wait_cost);
            add_to(exec.world, &owner, QUEUE_COUNT_ATTR, -1);
            if !exec.world.is_halted(&executor) {
                entry.restore_registers(&mut exec.context.registers);
                self.run_command_chain(exec, &entry);
            }
        } else {
            debug!(?executor, "Dropping queue entry for vanished executor");
        }
        drop(entry);
        exec.context.reset();
    }

    fn run_command_chain(&mut self, exec: &mut ExecParams<'_>, entry: &QueueEntry) {
        let args: Vec<&str> = entry.args().collect();
        let pipe_limit = self.config().queue.pipe_nest_limit;
        let threshold = self.config().queue.max_command_duration();

        let mut rest = Some(entry.command());
        while let Some(remaining) = rest {
            let (mut command, mut after) = split_command(remaining);
            if command.is_empty() {
                rest = after;
                continue;
            }

            let mut pipes = 0;
            while pipes < pipe_limit {
                let Some(next) = after.and_then(|a| a.strip_prefix('|')) else {
                    break;
                };
                pipes += 1;
                exec.context.begin_pipe(entry.executor);
                let processed = self.interpret(exec, entry, command, &args);
                exec.context.end_pipe();
                if processed.flow == Flow::Break {
                    return;
                }
                (command, after) = split_command(next);
            }

            let started = Instant::now();
            let usage_before = processor_usage();
            let processed = self.interpret(exec, entry, command, &args);
            let elapsed = started.elapsed();
            let used = processor_usage().saturating_sub(usage_before);
            exec.world.charge_cpu(&entry.executor, used);
            exec.context.pipe_input = None;

            if elapsed >= threshold {
                warn!(
                    executor = ?entry.executor,
                    elapsed = %humantime::format_duration(elapsed),
                    enactor = ?entry.enactor,
                    command = processed.logged.as_str(),
                    "Queued command ran long"
                );
            }
            if processed.flow == Flow::Break {
                return;
            }
            rest = after;
        }
    }

    fn interpret(
        &mut self,
        exec: &mut ExecParams<'_>,
        entry: &QueueEntry,
        command: &str,
        args: &[&str],
    ) -> Processed {
        if command.is_empty() {
            return Processed::default();
        }
        let call = CommandCall {
            executor: entry.executor,
            caller: entry.caller,
            enactor: entry.enactor,
            command,
            args,
        };
        exec.interpreter
            .process_command(self, exec.world, exec.context, &call)
    }
}
