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

//! The console's own commands, wrapped around the scripted interpreter.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info};
use waitq_common::Obj;
use waitq_common::model::WorldState;
use waitq_kernel::testing::{MemoryWorld, ScriptInterpreter};
use waitq_kernel::{CommandCall, CommandQueue, Config, ExecContext, ExecParams, Interpreter};

/// New players and things start out with this much to spend.
const STARTING_BALANCE: i64 = 1000;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Outcome {
    Continue,
    Quit,
}

/// A queue hosted over an in-memory world, with one player at the keyboard.
pub struct Console {
    queue: CommandQueue,
    world: MemoryWorld,
    interpreter: ScriptInterpreter,
    context: ExecContext,
    player: Obj,
    clock: SystemTime,
}

impl Console {
    pub fn new(config: Arc<Config>, player_name: &str, now: SystemTime) -> Self {
        let mut world = MemoryWorld::new();
        let player = match world.find(player_name) {
            Some(player) => player,
            None => world.add_player(player_name, STARTING_BALANCE),
        };
        let mut queue = CommandQueue::new(config);
        let scheduled = queue.schedule_system_tasks(now);
        debug!(scheduled, "System dispatches registered");
        Self {
            queue,
            world,
            interpreter: ScriptInterpreter::at(now),
            context: ExecContext::new(),
            player,
            clock: now,
        }
    }

    pub fn player(&self) -> Obj {
        self.player
    }

    pub fn world(&self) -> &MemoryWorld {
        &self.world
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Bring the clock up to `now` (it never runs backwards) and give the queue one tick.
    pub fn catch_up(&mut self, now: SystemTime) -> usize {
        if now > self.clock {
            self.clock = now;
        }
        self.tick()
    }

    fn tick(&mut self) -> usize {
        self.interpreter.set_clock(self.clock);
        let mut exec = ExecParams {
            world: &mut self.world,
            interpreter: &mut self.interpreter,
            context: &mut self.context,
        };
        self.queue.tick(&mut exec, self.clock)
    }

    /// Jump `secs` into the future and tick until the queue has nothing more due.
    fn fast_forward(&mut self, secs: u64) -> usize {
        self.clock += Duration::from_secs(secs);
        let mut total = 0;
        loop {
            let ran = self.tick();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    fn run_as(&mut self, who: Obj, command: &str) {
        let call = CommandCall {
            executor: who,
            caller: who,
            enactor: self.player,
            command,
            args: &[],
        };
        self.interpreter.set_clock(self.clock);
        self.interpreter
            .process_command(&mut self.queue, &mut self.world, &mut self.context, &call);
        self.context.clear_registers();
    }

    fn tell(&mut self, text: &str) {
        let player = self.player;
        self.world.notify(&player, text);
    }

    /// Handle one line of input.
    pub fn handle_line(&mut self, line: &str) -> Outcome {
        let line = line.trim();
        if line.is_empty() {
            return Outcome::Continue;
        }
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(word, rest)| (word, rest.trim()));

        match word.to_ascii_lowercase().as_str() {
            ":quit" | "quit" | "exit" => return Outcome::Quit,
            ":tick" => {
                let secs = if rest.is_empty() { 1 } else { rest.parse().unwrap_or(0) };
                let ran = self.fast_forward(secs);
                self.tell(&format!("{ran} queue entries run."));
            }
            "@money" => {
                let player = self.player;
                if let Ok(amount) = rest.parse::<i64>() {
                    self.world.set_balance(&player, amount);
                }
                let balance = self.world.balance(&player);
                self.tell(&format!("You have {balance} pennies."));
            }
            "@create" | "@create/player" => {
                if rest.is_empty() {
                    self.tell("Create what?");
                } else {
                    let created = if word.eq_ignore_ascii_case("@create/player") {
                        self.world.add_player(rest, STARTING_BALANCE)
                    } else {
                        self.world.add_thing(rest, self.player)
                    };
                    info!(?created, name = rest, "Created object");
                    let name = self.world.name_of(&created);
                    self.tell(&format!("Created {name}."));
                }
            }
            "@as" => {
                let (target, command) = rest
                    .split_once(char::is_whitespace)
                    .unwrap_or((rest, ""));
                match self.world.match_thing(&self.player, target) {
                    Some(who) if self.world.controls(&self.player, &who) => {
                        self.run_as(who, command.trim())
                    }
                    Some(_) => self.tell("Permission denied."),
                    None => self.tell("No match."),
                }
            }
            _ => self.run_as(self.player, line),
        }
        Outcome::Continue
    }

    /// Output produced since the last call, as display lines. Anything not addressed to the
    /// player at the keyboard is prefixed with its recipient.
    pub fn drain_output(&mut self) -> Vec<String> {
        let mut lines = vec![];
        for (who, messages) in self.world.take_all_messages() {
            for message in messages {
                if who == self.player {
                    lines.push(message);
                } else {
                    lines.push(format!("[{}] {message}", self.world.name_of(&who)));
                }
            }
        }
        lines
    }
}
