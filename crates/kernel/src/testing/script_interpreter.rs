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
use waitq_common::util::parse_counter;

use crate::admin::{
    PsMode, QueueCommand, WaitRequest, do_halt, do_notify, do_ps, do_queue, do_wait, report,
};
use crate::tasks::MAX_GLOBAL_REGS;
use crate::tasks::bulk::NotifyMode;
use crate::tasks::command_queue::CommandQueue;
use crate::tasks::exec::{CommandCall, ExecContext, ExecParams, Flow, Interpreter, Processed};

const HUH: &str = "Huh?  (Type \"help\" for help.)";
const ILLEGAL_SWITCHES: &str = "Illegal combination of switches.";

/// A command that reached the interpreter.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Executed {
    pub executor: Obj,
    pub enactor: Obj,
    /// After substitution.
    pub command: String,
    /// Ran as a pipe stage with its output captured.
    pub piped: bool,
}

/// A small command language, enough to drive the queue end to end:
///
/// * `think <text>`: tell the executor.
/// * `@pemit <target>=<text>`
/// * `@setq <n>=<text>`
/// * `@break [<cond>]`: abandon the rest of the command chain. `@break 0` does nothing.
/// * `@wait[/until] <event>=<command>`
/// * `@notify[/first|/all|/quiet|/drain] <object>[/<attr>][=<count>]` and `@drain <object>`
/// * `@halt[/all] [<target>]`
/// * `@ps[/brief|/summary|/long|/all] [<target>]`
/// * `@queue/kick <n>` and `@queue/warp <secs>`
///
/// Text is substituted before it runs: `%0`-`%9` are the arguments, `%q0`-`%q9` the registers,
/// `%|` the previous pipe stage's output, `%#` the enactor, `%!` the executor. The command part
/// of `@wait` is left alone so it substitutes when it eventually runs.
#[derive(Debug, Clone)]
pub struct ScriptInterpreter {
    clock: SystemTime,
    pub executed: Vec<Executed>,
}

impl Default for ScriptInterpreter {
    fn default() -> Self {
        Self::at(SystemTime::now())
    }
}

impl ScriptInterpreter {
    /// An interpreter whose commands see `now` as the current time.
    pub fn at(now: SystemTime) -> Self {
        Self {
            clock: now,
            executed: vec![],
        }
    }

    pub fn clock(&self) -> SystemTime {
        self.clock
    }

    pub fn set_clock(&mut self, now: SystemTime) {
        self.clock = now;
    }
}

/// Expand `%` escapes in `text`.
pub fn substitute(text: &str, context: &ExecContext, call: &CommandCall<'_>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(code) = chars.next() else {
            out.push('%');
            break;
        };
        match code {
            '0'..='9' => {
                let i = code as usize - '0' as usize;
                out.push_str(call.args.get(i).copied().unwrap_or_default());
            }
            'q' | 'Q' => {
                let register = chars
                    .next_if(char::is_ascii_digit)
                    .map(|d| d as usize - '0' as usize);
                match register {
                    Some(i) if i < MAX_GLOBAL_REGS => out.push_str(&context.registers[i]),
                    _ => out.push(code),
                }
            }
            '|' => out.push_str(context.pipe_input.as_deref().unwrap_or_default()),
            '#' => out.push_str(&call.enactor.to_string()),
            '!' => out.push_str(&call.executor.to_string()),
            other => out.push(other),
        }
    }
    out
}

/// Deliver `text` to `who`, unless a pipe stage swallows it.
fn emit(world: &mut dyn WorldState, context: &mut ExecContext, who: &Obj, text: &str) {
    if !context.capture(who, text) {
        world.notify(who, text);
    }
}

/// Split `@word/sw1/sw2 rest` into the lowercased word, its switches, and the rest.
fn parse_verb(command: &str) -> (String, Vec<String>, &str) {
    let (head, rest) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));
    let mut parts = head.split('/');
    let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
    let switches = parts.map(str::to_ascii_lowercase).collect();
    (verb, switches, rest.trim())
}

fn non_empty(text: &str) -> Option<&str> {
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

impl ScriptInterpreter {
    fn notify_command(
        &self,
        queue: &mut CommandQueue,
        world: &mut dyn WorldState,
        executor: Obj,
        mut modes: Vec<NotifyMode>,
        rest: &str,
    ) {
        if modes.len() > 1 {
            world.notify(&executor, ILLEGAL_SWITCHES);
            return;
        }
        let mode = modes.pop().unwrap_or(NotifyMode::First);
        let (what, count) = match rest.split_once('=') {
            Some((what, count)) => (what.trim(), Some(count)),
            None => (rest, None),
        };
        if let Err(e) = do_notify(queue, world, executor, mode, what, count, self.clock) {
            report(world, &executor, &e);
        }
    }

    fn wait_command(
        &self,
        queue: &mut CommandQueue,
        world: &mut dyn WorldState,
        context: &ExecContext,
        call: &CommandCall<'_>,
        until: bool,
        rest: &str,
    ) {
        let Some((event, command)) = rest.split_once('=') else {
            world.notify(&call.executor, HUH);
            return;
        };
        let args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
        let request = WaitRequest {
            executor: call.executor,
            caller: call.caller,
            enactor: call.enactor,
            until,
            event: event.trim(),
            command: command.trim(),
            args: &args,
            registers: &context.registers,
        };
        if let Err(e) = do_wait(queue, world, &request, self.clock) {
            report(world, &call.executor, &e);
        }
    }
}

impl Interpreter for ScriptInterpreter {
    fn process_command(
        &mut self,
        queue: &mut CommandQueue,
        world: &mut dyn WorldState,
        context: &mut ExecContext,
        call: &CommandCall<'_>,
    ) -> Processed {
        let executor = call.executor;
        let (verb, switches, raw_rest) = parse_verb(call.command);

        // The deferred half of @wait is stored as written.
        let rest = if verb == "@wait" {
            match raw_rest.split_once('=') {
                Some((event, command)) => {
                    format!("{}={command}", substitute(event, context, call))
                }
                None => substitute(raw_rest, context, call),
            }
        } else {
            substitute(raw_rest, context, call)
        };
        let logged = if rest.is_empty() {
            call.command.split_whitespace().next().unwrap_or_default().to_string()
        } else {
            let head = call.command.split_whitespace().next().unwrap_or_default();
            format!("{head} {rest}")
        };
        self.executed.push(Executed {
            executor,
            enactor: call.enactor,
            command: logged.clone(),
            piped: context.in_pipe(),
        });

        let mut flow = Flow::Continue;
        match verb.as_str() {
            "think" => emit(world, context, &executor, &rest),
            "@pemit" => match rest.split_once('=') {
                Some((target, text)) => match world.match_thing(&executor, target) {
                    Some(target) => emit(world, context, &target, text),
                    None => world.notify(&executor, "No match."),
                },
                None => world.notify(&executor, HUH),
            },
            "@setq" => {
                let register = rest
                    .split_once('=')
                    .and_then(|(n, text)| Some((n.trim().parse::<usize>().ok()?, text)));
                match register {
                    Some((n, text)) if n < MAX_GLOBAL_REGS => {
                        context.registers[n] = text.to_string()
                    }
                    _ => world.notify(&executor, "Invalid register."),
                }
            }
            "@break" => {
                if non_empty(&rest).is_none_or(|cond| cond != "0") {
                    flow = Flow::Break;
                }
            }
            "@wait" => {
                let until = switches.iter().any(|s| s == "until");
                self.wait_command(queue, world, context, call, until, &rest);
            }
            "@notify" => {
                let modes = switches
                    .iter()
                    .filter_map(|s| match s.as_str() {
                        "first" => Some(NotifyMode::First),
                        "all" => Some(NotifyMode::All),
                        "quiet" => Some(NotifyMode::Quiet),
                        "drain" => Some(NotifyMode::Drain),
                        _ => None,
                    })
                    .collect();
                self.notify_command(queue, world, executor, modes, &rest);
            }
            "@drain" => {
                self.notify_command(queue, world, executor, vec![NotifyMode::Drain], &rest)
            }
            "@halt" => {
                let all = switches.iter().any(|s| s == "all");
                if let Err(e) = do_halt(queue, world, executor, non_empty(&rest), all) {
                    report(world, &executor, &e);
                }
            }
            "@ps" => {
                let all = switches.iter().any(|s| s == "all");
                let modes: Vec<PsMode> = switches
                    .iter()
                    .filter_map(|s| match s.as_str() {
                        "brief" => Some(PsMode::Brief),
                        "summary" => Some(PsMode::Summary),
                        "long" => Some(PsMode::Long),
                        _ => None,
                    })
                    .collect();
                if modes.len() > 1 {
                    world.notify(&executor, ILLEGAL_SWITCHES);
                } else {
                    let mode = modes.first().copied().unwrap_or(PsMode::Brief);
                    let result =
                        do_ps(queue, world, executor, non_empty(&rest), all, mode, self.clock);
                    if let Err(e) = result {
                        report(world, &executor, &e);
                    }
                }
            }
            "@queue" => {
                let amount = parse_counter(&rest);
                let command = match switches.first().map(String::as_str) {
                    Some("kick") if switches.len() == 1 => Some(QueueCommand::Kick(amount)),
                    Some("warp") if switches.len() == 1 => Some(QueueCommand::Warp(amount)),
                    _ => None,
                };
                match command {
                    Some(command) => {
                        let now = self.clock;
                        let mut scratch = ExecContext::new();
                        let mut exec = ExecParams {
                            world,
                            interpreter: self,
                            context: &mut scratch,
                        };
                        if let Err(e) = do_queue(queue, &mut exec, executor, command, now) {
                            report(exec.world, &executor, &e);
                        }
                    }
                    None => world.notify(&executor, ILLEGAL_SWITCHES),
                }
            }
            _ => world.notify(&executor, HUH),
        }

        Processed { logged, flow }
    }
}
