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

//! End to end scenarios: commands typed by players go through the scripted interpreter into
//! the queue, and the queue is ticked along a simulated clock.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use pretty_assertions::assert_eq;
use waitq_common::Obj;
use waitq_common::model::WorldState;
use waitq_kernel::testing::{MemoryWorld, ScriptInterpreter};
use waitq_kernel::{
    CommandCall, CommandQueue, Config, ExecContext, ExecParams, Interpreter, Invocation,
    QueueFilter, WaitFor,
};

const DAY: u64 = 24 * 60 * 60;

struct Harness {
    queue: CommandQueue,
    world: MemoryWorld,
    interpreter: ScriptInterpreter,
    context: ExecContext,
    now: SystemTime,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Commands cost one unit and never carry the random surcharge.
    fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.queue.wait_cost = 1;
        config.queue.machine_cost = 0;
        tweak(&mut config);
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        Self {
            queue: CommandQueue::new(Arc::new(config)),
            world: MemoryWorld::new(),
            interpreter: ScriptInterpreter::at(now),
            context: ExecContext::new(),
            now,
        }
    }

    /// Run a command as though `who` had typed it.
    fn type_command(&mut self, who: Obj, command: &str) {
        let call = CommandCall {
            executor: who,
            caller: who,
            enactor: who,
            command,
            args: &[],
        };
        self.interpreter
            .process_command(&mut self.queue, &mut self.world, &mut self.context, &call);
        self.context.clear_registers();
    }

    /// Queue a command directly, bypassing @wait.
    fn queue_command(&mut self, executor: Obj, enactor: Obj, command: &str, wait: WaitFor) {
        self.queue
            .wait(
                &mut self.world,
                &Invocation {
                    executor,
                    caller: executor,
                    enactor,
                    command,
                    args: &[],
                    registers: &[],
                },
                wait,
            )
            .unwrap();
    }

    /// Move the clock on and run one chunk of whatever is due.
    fn advance(&mut self, secs: u64) -> usize {
        self.now += Duration::from_secs(secs);
        self.interpreter.set_clock(self.now);
        let mut exec = ExecParams {
            world: &mut self.world,
            interpreter: &mut self.interpreter,
            context: &mut self.context,
        };
        self.queue.tick(&mut exec, self.now)
    }

    /// Keep ticking without moving the clock until nothing more runs.
    fn settle(&mut self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.advance(0);
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Commands interpreted since the last call, typed or queued.
    fn ran(&mut self) -> Vec<String> {
        std::mem::take(&mut self.interpreter.executed)
            .into_iter()
            .map(|e| e.command)
            .collect()
    }
}

#[test]
fn test_untimed_semaphore_waits_for_a_notify() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 100);
    h.type_command(alice, "@wait me=think released");
    h.ran();

    for _ in 0..10 {
        h.advance(365 * DAY);
    }
    assert_eq!(h.ran(), Vec::<String>::new());
    assert_eq!(h.queue.pending_commands(), 1);

    h.type_command(alice, "@notify me");
    assert_eq!(h.settle(), 1);
    assert_eq!(h.ran(), vec!["@notify me", "think released"]);
    assert_eq!(h.world.take_messages(&alice), vec!["Notified.", "released"]);
    assert_eq!(h.world.attr_get(&alice, "SEMAPHORE"), None);
}

#[test]
fn test_bounded_release_leaves_the_rest_counted() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 100);
    for i in 0..5 {
        h.type_command(alice, &format!("@wait me/doorbell=think {i}"));
    }
    assert_eq!(h.world.attr_get(&alice, "DOORBELL").as_deref(), Some("5"));

    h.type_command(alice, "@notify me/doorbell=3");
    assert_eq!(h.world.attr_get(&alice, "DOORBELL").as_deref(), Some("2"));
    h.ran();
    assert_eq!(h.settle(), 3);
    assert_eq!(h.ran(), vec!["think 0", "think 1", "think 2"]);
    assert_eq!(h.queue.pending_commands(), 2);
}

#[test]
fn test_notify_releases_earliest_waiters_first() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 100);
    let bell = h.world.add_thing("bell", alice);
    for (delay, command) in [(0, "think t1"), (3, "think t2"), (5, "think t3")] {
        h.advance(delay);
        h.type_command(alice, &format!("@wait bell={command}"));
    }
    h.ran();

    h.type_command(alice, "@notify bell=2");
    h.settle();
    assert_eq!(h.ran(), vec!["@notify bell=2", "think t1", "think t2"]);
    assert_eq!(h.queue.pending_commands(), 1);
}

#[test]
fn test_halt_owner_refunds_only_that_owner() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 10);
    let bob = h.world.add_player("bob", 10);
    let gadget = h.world.add_thing("gadget", alice);
    let later = WaitFor::Until(h.now + Duration::from_secs(60));
    for who in [alice, gadget, alice] {
        h.queue_command(who, who, "think alice's", later.clone());
    }
    for _ in 0..2 {
        h.queue_command(bob, bob, "think bob's", later.clone());
    }
    assert_eq!(h.world.balance(&alice), 7);
    assert_eq!(h.world.balance(&bob), 8);

    assert_eq!(h.queue.halt(&mut h.world, &QueueFilter::owned_by(alice)), 3);
    assert_eq!(h.world.balance(&alice), 10);
    assert_eq!(h.world.attr_get(&alice, "QUEUE"), None);
    assert_eq!(h.world.balance(&bob), 8);
    assert_eq!(h.world.attr_get(&bob, "QUEUE").as_deref(), Some("2"));
    assert_eq!(h.queue.pending_commands(), 2);

    // A second halt, or one against something long gone, finds nothing.
    assert_eq!(h.queue.halt(&mut h.world, &QueueFilter::owned_by(alice)), 0);
    h.world.destroy(&gadget);
    assert_eq!(h.queue.halt(&mut h.world, &QueueFilter::run_by(gadget)), 0);
    assert_eq!(h.world.balance(&alice), 10);
}

#[test]
fn test_run_ready_bound_and_order() {
    let mut h = Harness::with_config(|c| c.queue.queue_chunk = 1);
    let alice = h.world.add_player("alice", 100);
    let gadget = h.world.add_thing("gadget", alice);
    let start = h.now;
    h.queue_command(gadget, gadget, "think thing first", WaitFor::Until(start));
    h.queue_command(gadget, alice, "think player first", WaitFor::Until(start));
    let later = WaitFor::Until(start + Duration::from_secs(5));
    h.queue_command(alice, alice, "think player later", later);

    h.advance(5);
    // Same time: players ahead of things. Otherwise earliest first.
    assert_eq!(h.ran(), vec!["think player first"]);
    assert_eq!(h.advance(0), 1);
    assert_eq!(h.ran(), vec!["think thing first"]);
    assert_eq!(h.advance(0), 1);
    assert_eq!(h.ran(), vec!["think player later"]);
    assert_eq!(h.advance(0), 0);
}

#[test]
fn test_running_an_entry_refunds_its_cost() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 10);
    let due = WaitFor::Until(h.now + Duration::from_secs(10));
    h.queue_command(alice, alice, "think paid", due);
    assert_eq!(h.world.balance(&alice), 9);
    assert_eq!(h.world.attr_get(&alice, "QUEUE").as_deref(), Some("1"));

    assert_eq!(h.advance(9), 0);
    assert_eq!(h.advance(1), 1);
    assert_eq!(h.world.balance(&alice), 10);
    assert_eq!(h.world.attr_get(&alice, "QUEUE"), None);
    assert_eq!(h.world.take_messages(&alice), vec!["paid"]);
}

#[test]
fn test_wait_on_named_attribute_then_notify() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 100);
    let foo = h.world.add_thing("foo", alice);
    h.type_command(alice, "@wait foo/bar=think rang");
    assert_eq!(h.world.attr_get(&foo, "BAR").as_deref(), Some("1"));

    h.type_command(alice, "@notify foo/bar=1");
    assert_eq!(h.world.attr_get(&foo, "BAR"), None);
    h.settle();
    assert!(h.ran().contains(&"think rang".to_string()));
    assert_eq!(h.world.take_messages(&alice), vec!["Notified.", "rang"]);
}

#[test]
fn test_semaphore_timeout_runs_and_gives_back_its_count() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 100);
    h.type_command(alice, "@wait me/5=think timed out");
    assert_eq!(h.world.attr_get(&alice, "SEMAPHORE").as_deref(), Some("1"));
    assert_eq!(h.advance(4), 0);
    assert_eq!(h.advance(1), 1);
    assert_eq!(h.world.take_messages(&alice), vec!["timed out"]);
    assert_eq!(h.world.attr_get(&alice, "SEMAPHORE"), None);
}

#[test]
fn test_notify_beats_semaphore_deadline() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 100);
    h.type_command(alice, "@wait me/10=think hi");
    assert_eq!(h.world.balance(&alice), 99);
    assert_eq!(h.advance(2), 0);

    h.type_command(alice, "@notify me");
    h.ran();
    assert_eq!(h.settle(), 1);
    assert_eq!(h.ran(), vec!["think hi"]);

    // The old deadline passes without the command running a second time.
    assert_eq!(h.advance(20), 0);
    assert!(h.ran().is_empty());
    assert_eq!(h.world.attr_get(&alice, "SEMAPHORE"), None);
    assert_eq!(h.world.take_messages(&alice), vec!["Notified.", "hi"]);
    assert_eq!(h.world.balance(&alice), 100);
    assert_eq!(h.queue.pending_commands(), 0);
}

#[test]
fn test_pipe_feeds_next_stage_and_break_ends_chain() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 100);
    h.type_command(alice, "@wait 0=think first;|think got %|;@break;think never");
    h.ran();
    h.settle();

    let executed = h.interpreter.executed.clone();
    let commands: Vec<(&str, bool)> = executed
        .iter()
        .map(|e| (e.command.as_str(), e.piped))
        .collect();
    assert_eq!(
        commands,
        vec![("think first", true), ("think got first", false), ("@break", false)]
    );
    assert_eq!(h.world.take_messages(&alice), vec!["got first"]);
}

#[test]
fn test_registers_restored_then_cleared() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 100);
    let registers = vec![String::new(), "saved".to_string()];
    h.queue
        .wait(
            &mut h.world,
            &Invocation {
                executor: alice,
                caller: alice,
                enactor: alice,
                command: "think now %q1;@wait 5=think later %q1",
                args: &[],
                registers: &registers,
            },
            WaitFor::Immediate,
        )
        .unwrap();

    h.settle();
    assert!(h.context.registers.iter().all(String::is_empty));
    h.advance(5);
    assert_eq!(h.world.take_messages(&alice), vec!["now saved", "later saved"]);
    assert!(h.context.registers.iter().all(String::is_empty));
}

#[test]
fn test_long_running_command_still_completes() {
    let mut h = Harness::with_config(|c| c.queue.max_command_secs = 0);
    let alice = h.world.add_player("alice", 10);
    h.queue_command(alice, alice, "think slow;think slower", WaitFor::Immediate);
    assert_eq!(h.settle(), 1);
    assert_eq!(h.world.take_messages(&alice), vec!["slow", "slower"]);
    assert_eq!(h.world.balance(&alice), 10);
}

#[test]
fn test_quota_runaway_halts_everything() {
    let mut h = Harness::with_config(|c| c.queue.queue_max = 2);
    let alice = h.world.add_player("alice", 10);
    for _ in 0..3 {
        h.type_command(alice, "@wait 30=think x");
    }
    assert_eq!(
        h.world.take_messages(&alice),
        vec!["Run away objects: too many commands queued.  Halted."]
    );
    assert_eq!(h.queue.pending_commands(), 0);
    assert!(h.world.is_halted(&alice));
    assert_eq!(h.world.balance(&alice), 10);
    assert_eq!(h.world.attr_get(&alice, "QUEUE"), None);

    // Once halted, further waits are refused without comment.
    h.type_command(alice, "@wait 30=think y");
    assert_eq!(h.queue.pending_commands(), 0);
    assert!(h.world.take_messages(&alice).is_empty());
}

#[test]
fn test_insufficient_funds() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 0);
    h.type_command(alice, "@wait 5=think x");
    assert_eq!(
        h.world.take_messages(&alice),
        vec!["Not enough money to queue command."]
    );
    assert_eq!(h.queue.pending_commands(), 0);
}

#[test]
fn test_drain_discards_and_refunds() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 10);
    h.type_command(alice, "@wait me=think a");
    h.type_command(alice, "@wait me=think b");
    assert_eq!(h.world.balance(&alice), 8);

    h.type_command(alice, "@drain me");
    assert_eq!(h.world.take_messages(&alice), vec!["Drained."]);
    assert_eq!(h.queue.pending_commands(), 0);
    assert_eq!(h.world.balance(&alice), 10);
    assert_eq!(h.world.attr_get(&alice, "SEMAPHORE"), None);
    h.ran();
    assert_eq!(h.settle(), 0);
    assert!(h.ran().is_empty());
}

#[test]
fn test_vanished_executor_runs_nothing() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 10);
    let gadget = h.world.add_thing("gadget", alice);
    h.queue_command(gadget, gadget, "think ghost", WaitFor::Immediate);
    h.world.destroy(&gadget);
    assert_eq!(h.settle(), 1);
    assert!(h.ran().is_empty());
    assert_eq!(h.queue.pending_commands(), 0);
}

#[test]
fn test_kick_while_dequeueing_disabled() {
    let mut h = Harness::new();
    let wizard = h.world.wizard();
    let alice = h.world.add_player("alice", 10);
    h.queue.set_dequeue_enabled(false);
    h.type_command(alice, "@wait 0=think kicked");
    assert_eq!(h.advance(1), 0);

    h.type_command(wizard, "@queue/kick 5");
    assert_eq!(
        h.world.take_messages(&wizard),
        vec!["Warning: automatic dequeueing is disabled.", "1 commands processed."]
    );
    assert_eq!(h.world.take_messages(&alice), vec!["kicked"]);
    assert!(!h.queue.dequeue_enabled());
}

#[test]
fn test_warp_moves_timed_entries() {
    let mut h = Harness::new();
    let wizard = h.world.wizard();
    let alice = h.world.add_player("alice", 10);
    h.type_command(alice, "@wait 100=think warped");
    h.type_command(alice, "@wait me=think untouched");

    h.type_command(wizard, "@queue/warp 60");
    assert_eq!(
        h.world.take_messages(&wizard),
        vec!["WaitQ timer advanced 60 seconds."]
    );
    assert_eq!(h.advance(40), 1);
    assert_eq!(h.world.take_messages(&alice), vec!["warped"]);

    h.type_command(wizard, "@queue/warp -30");
    assert_eq!(
        h.world.take_messages(&wizard),
        vec!["WaitQ timer set back 30 seconds."]
    );
    assert_eq!(h.queue.pending_commands(), 1);

    // Only privileged players may push the queue around.
    h.type_command(alice, "@queue/warp 10");
    assert_eq!(h.world.take_messages(&alice), vec!["Permission denied."]);
}

#[test]
fn test_ps_from_the_command_line() {
    let mut h = Harness::new();
    let alice = h.world.add_player("alice", 10);
    h.type_command(alice, "@wait 30=think later");
    h.type_command(alice, "@ps");
    assert_eq!(
        h.world.take_messages(&alice),
        vec![
            "----- Wait Queue -----",
            "[30]alice(#1):think later",
            "Totals: Wait Queue...1/1  Semaphores...0/0",
        ]
    );
    h.type_command(alice, "@ps/all");
    assert_eq!(h.world.take_messages(&alice), vec!["Permission denied."]);
}
