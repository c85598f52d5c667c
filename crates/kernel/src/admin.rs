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

//! The player-facing commands in front of the queue: @halt, @wait, @notify, @ps and @queue.
//!
//! Each resolves names, checks permissions, calls into the `CommandQueue`, and tells the
//! player what happened. Refusals come back as `QueueError`; `report` turns them into the
//! message the player sees.

use std::time::{Duration, SystemTime};

use strum::Display;
use tracing::debug;
use waitq_common::Obj;
use waitq_common::model::{SEMAPHORE_ATTR, WorldState};
use waitq_common::tasks::QueueError;
use waitq_common::util::{is_rational, parse_counter};

use crate::tasks::bulk::{NotifyMode, QueueFilter};
use crate::tasks::command_queue::CommandQueue;
use crate::tasks::exec::ExecParams;
use crate::tasks::listing::ListedEntry;
use crate::tasks::queue_entry::{Invocation, Semaphore};
use crate::tasks::wait::WaitFor;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum PsMode {
    Brief,
    Summary,
    Long,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QueueCommand {
    /// Run this many ready entries now.
    Kick(i64),
    /// Shift every timed entry this many seconds earlier.
    Warp(i64),
}

/// Tell `who` why their command was refused.
///
/// Funds and quota failures were already reported to the owner when they happened, and a
/// halted executor or disabled interpreter fails silently.
pub fn report(world: &mut dyn WorldState, who: &Obj, error: &QueueError) {
    match error {
        QueueError::PermissionDenied
        | QueueError::NoSuchTarget
        | QueueError::InvalidArgument(_) => world.notify(who, &error.to_string()),
        QueueError::InsufficientFunds
        | QueueError::QuotaExceeded
        | QueueError::ExecutorHalted
        | QueueError::InterpretationDisabled => {
            debug!(?who, %error, "Queue command refused");
        }
    }
}

/// A time given in (possibly fractional) seconds, either from now or, with `until`, since the
/// epoch.
fn parse_when(text: &str, until: bool, now: SystemTime) -> SystemTime {
    let secs: f64 = text.trim().parse().unwrap_or(0.0);
    let span = Duration::try_from_secs_f64(secs.abs()).unwrap_or(Duration::ZERO);
    let base = if until { SystemTime::UNIX_EPOCH } else { now };
    if secs >= 0.0 {
        base.checked_add(span).unwrap_or(base)
    } else {
        base.checked_sub(span).unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

/// Parameters of an @wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitRequest<'a> {
    pub executor: Obj,
    pub caller: Obj,
    pub enactor: Obj,
    /// The time is absolute rather than a delay.
    pub until: bool,
    /// A number of seconds, or `object[/timeout]` or `object/attribute`.
    pub event: &'a str,
    pub command: &'a str,
    pub args: &'a [String],
    pub registers: &'a [String],
}

/// @wait: queue a command on a timer or a semaphore.
pub fn do_wait(
    queue: &mut CommandQueue,
    world: &mut dyn WorldState,
    request: &WaitRequest<'_>,
    now: SystemTime,
) -> Result<(), QueueError> {
    let invocation = Invocation {
        executor: request.executor,
        caller: request.caller,
        enactor: request.enactor,
        command: request.command,
        args: request.args,
        registers: request.registers,
    };

    if is_rational(request.event) {
        let due = parse_when(request.event, request.until, now);
        queue.wait(world, &invocation, WaitFor::Until(due))?;
        return Ok(());
    }

    let (what, rest) = request
        .event
        .split_once('/')
        .unwrap_or((request.event, ""));
    let executor = request.executor;
    let object = world
        .match_thing(&executor, what)
        .ok_or(QueueError::NoSuchTarget)?;
    if !world.controls(&executor, &object) && !world.link_ok(&object) {
        return Err(QueueError::PermissionDenied);
    }

    let mut attr = SEMAPHORE_ATTR.to_string();
    let mut timeout = None;
    let rest = rest.trim();
    if !rest.is_empty() {
        if is_rational(rest) {
            timeout = Some(parse_when(rest, request.until, now));
        } else {
            if !world.attr_defined(rest) {
                world.define_attr(rest)?;
            }
            if !world.can_set_attr(&executor, &object, rest) {
                return Err(QueueError::PermissionDenied);
            }
            attr = rest.to_ascii_uppercase();
        }
    }

    queue.wait(
        world,
        &invocation,
        WaitFor::Semaphore {
            semaphore: Semaphore { object, attr },
            timeout,
        },
    )?;
    Ok(())
}

/// @notify: release or drain waiters on `object[/attribute]`.
pub fn do_notify(
    queue: &mut CommandQueue,
    world: &mut dyn WorldState,
    executor: Obj,
    mode: NotifyMode,
    what: &str,
    count: Option<&str>,
    now: SystemTime,
) -> Result<(), QueueError> {
    let (name, attr) = what.split_once('/').unwrap_or((what, ""));
    let object = world
        .match_thing(&executor, name)
        .ok_or(QueueError::NoSuchTarget)?;
    if !world.controls(&executor, &object) && !world.link_ok(&object) {
        return Err(QueueError::PermissionDenied);
    }

    let attr = attr.trim();
    let attr = if attr.is_empty() || !world.attr_defined(attr) {
        SEMAPHORE_ATTR.to_string()
    } else if world.can_set_attr(&executor, &object, attr) {
        attr.to_ascii_uppercase()
    } else {
        return Err(QueueError::PermissionDenied);
    };

    let count = count
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map_or(1, parse_counter);
    if count <= 0 {
        return Ok(());
    }

    queue.notify(world, object, Some(&attr), mode, count, now);
    if mode != NotifyMode::Quiet && !world.is_quiet(&executor) && !world.is_quiet(&object) {
        let reply = if mode == NotifyMode::Drain {
            "Drained."
        } else {
            "Notified."
        };
        world.notify(&executor, reply);
    }
    Ok(())
}

/// Work out whose entries a @halt or @ps is about. With no target that is the player's own
/// (narrowed to the player itself if it is an object), or everyone's with `/all`.
fn resolve_filter(
    world: &dyn WorldState,
    player: &Obj,
    target: Option<&str>,
    all: bool,
    may_target: impl Fn(&Obj) -> bool,
) -> Result<QueueFilter, QueueError> {
    let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
        if all {
            return Ok(QueueFilter::everything());
        }
        let mut filter = QueueFilter::owned_by(world.owner_of(player));
        if !world.is_player(player) {
            filter.object = Some(*player);
        }
        return Ok(filter);
    };

    let object = world
        .match_thing(player, target)
        .ok_or(QueueError::NoSuchTarget)?;
    if !may_target(&object) {
        return Err(QueueError::PermissionDenied);
    }
    if all {
        return Err(QueueError::InvalidArgument(
            "Can't specify a target and /all".to_string(),
        ));
    }
    Ok(if world.is_player(&object) {
        QueueFilter::owned_by(object)
    } else {
        QueueFilter::run_by(object)
    })
}

/// @halt: cancel queued commands.
pub fn do_halt(
    queue: &mut CommandQueue,
    world: &mut dyn WorldState,
    player: Obj,
    target: Option<&str>,
    all: bool,
) -> Result<usize, QueueError> {
    if all && !world.can_halt(&player) {
        return Err(QueueError::PermissionDenied);
    }
    let filter = {
        let world: &dyn WorldState = world;
        resolve_filter(world, &player, target, all, |object| {
            world.can_halt(&player) || world.controls(&player, object)
        })?
    };
    let halted = queue.halt(world, &filter);
    if !world.is_quiet(&player) {
        let owner = world.owner_of(&player);
        world.notify(&owner, &format!("{halted} queue entries removed."));
    }
    Ok(halted)
}

fn ps_line(world: &dyn WorldState, entry: &ListedEntry) -> String {
    let name = world.name_of(&entry.executor);
    match (entry.semaphore, entry.remaining_secs) {
        (Some(semaphore), Some(secs)) => format!("[{semaphore}/{secs}]{name}:{}", entry.command),
        (None, Some(secs)) => format!("[{secs}]{name}:{}", entry.command),
        (Some(semaphore), None) => format!("[{semaphore}]{name}:{}", entry.command),
        (None, None) => format!("{name}:{}", entry.command),
    }
}

fn ps_long_line(world: &dyn WorldState, entry: &ListedEntry) -> String {
    let mut line = format!("   Enactor: {}", world.name_of(&entry.enactor));
    for (i, arg) in entry.args.iter().enumerate() {
        line.push_str(&format!("; Arg{i}='{arg}'"));
    }
    line
}

/// @ps: list queued commands.
pub fn do_ps(
    queue: &CommandQueue,
    world: &mut dyn WorldState,
    player: Obj,
    target: Option<&str>,
    all: bool,
    mode: PsMode,
    now: SystemTime,
) -> Result<(), QueueError> {
    if all && !world.can_see_queue(&player) {
        return Err(QueueError::PermissionDenied);
    }
    let (filter, listing) = {
        let world: &dyn WorldState = world;
        let mut filter = resolve_filter(world, &player, target, all, |object| {
            world.controls(&player, object)
        })?;
        // An object target is still limited to what the player owns.
        if filter.object.is_some() {
            filter.owner = Some(world.owner_of(&player));
        }
        let listing = queue.inspect(world, &filter, now);
        (filter, listing)
    };
    debug!(?filter, %mode, "Listing queue");

    let mut lines = vec![];
    if mode != PsMode::Summary {
        for (heading, entries) in [
            ("----- Wait Queue -----", &listing.waiting),
            ("----- Semaphore Queue -----", &listing.semaphores),
        ] {
            if entries.is_empty() {
                continue;
            }
            lines.push(heading.to_string());
            for entry in entries {
                lines.push(ps_line(world, entry));
                if mode == PsMode::Long {
                    lines.push(ps_long_line(world, entry));
                }
            }
        }
    }
    let privileged = world.is_privileged(&player);
    if privileged {
        lines.push("----- System Queue -----".to_string());
        for (secs, task) in &listing.system {
            lines.push(format!("[{secs}]{}", task.description()));
        }
    }
    lines.push(format!(
        "Totals: Wait Queue...{}/{}  Semaphores...{}/{}",
        listing.waiting.len(),
        listing.total_waiting,
        listing.semaphores.len(),
        listing.total_semaphores
    ));
    if privileged {
        lines.push(format!("        System Tasks.....{}", listing.system.len()));
    }

    for line in lines {
        world.notify(&player, &line);
    }
    Ok(())
}

/// @queue: force the queue along, or shift its clock. Privileged players only.
pub fn do_queue(
    queue: &mut CommandQueue,
    exec: &mut ExecParams<'_>,
    player: Obj,
    command: QueueCommand,
    now: SystemTime,
) -> Result<(), QueueError> {
    if !exec.world.is_privileged(&player) {
        return Err(QueueError::PermissionDenied);
    }
    let quiet = exec.world.is_quiet(&player);
    if !queue.dequeue_enabled() {
        exec.world
            .notify(&player, "Warning: automatic dequeueing is disabled.");
    }
    match command {
        QueueCommand::Kick(n) => {
            let n = usize::try_from(n).unwrap_or(0);
            let outcome = queue.kick(exec, n, now);
            if !quiet {
                exec.world
                    .notify(&player, &format!("{} commands processed.", outcome.processed));
            }
        }
        QueueCommand::Warp(secs) => {
            queue.warp(secs);
            if !quiet {
                let reply = match secs {
                    s if s > 0 => format!("WaitQ timer advanced {s} seconds."),
                    s if s < 0 => format!("WaitQ timer set back {} seconds.", s.unsigned_abs()),
                    _ => "Object queue appended to player queue.".to_string(),
                };
                exec.world.notify(&player, &reply);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::MemoryWorld;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn queue() -> CommandQueue {
        let mut config = Config::default();
        config.queue.machine_cost = 0;
        config.queue.wait_cost = 1;
        CommandQueue::new(Arc::new(config))
    }

    fn wait(
        queue: &mut CommandQueue,
        world: &mut MemoryWorld,
        executor: Obj,
        event: &str,
        command: &str,
    ) -> Result<(), QueueError> {
        let args = vec!["first".to_string()];
        do_wait(
            queue,
            world,
            &WaitRequest {
                executor,
                caller: executor,
                enactor: executor,
                until: false,
                event,
                command,
                args: &args,
                registers: &[],
            },
            at(0),
        )
    }

    #[test]
    fn test_parse_when() {
        assert_eq!(parse_when("10", false, at(0)), at(10));
        assert_eq!(parse_when("1.5", false, at(0)), at(0) + Duration::from_millis(1500));
        assert_eq!(
            parse_when("100", true, at(0)),
            SystemTime::UNIX_EPOCH + Duration::from_secs(100)
        );
        assert_eq!(parse_when("-5", false, at(10)), at(5));
    }

    #[test]
    fn test_wait_on_unknown_attribute_defines_it() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        wait(&mut queue, &mut world, alice, "me/doorbell", "think ding").unwrap();
        assert!(world.attr_defined("DOORBELL"));
        assert_eq!(world.attr_get(&alice, "DOORBELL").as_deref(), Some("1"));

        assert_eq!(
            wait(&mut queue, &mut world, alice, "me/9lives", "think x"),
            Err(QueueError::InvalidArgument("Invalid attribute.".into()))
        );
    }

    #[test]
    fn test_wait_needs_control_or_link_ok() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let bob = world.add_player("bob", 10);
        let mut queue = queue();
        assert_eq!(
            wait(&mut queue, &mut world, alice, "bob", "think x"),
            Err(QueueError::PermissionDenied)
        );
        world.set_flag(&bob, waitq_common::model::ObjFlag::LinkOk, true);
        assert!(wait(&mut queue, &mut world, alice, "bob", "think x").is_ok());
        assert_eq!(
            wait(&mut queue, &mut world, alice, "nobody", "think x"),
            Err(QueueError::NoSuchTarget)
        );
    }

    #[test]
    fn test_halt_target_and_all_conflict() {
        let mut world = MemoryWorld::new();
        let wizard = world.wizard();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        assert_eq!(
            do_halt(&mut queue, &mut world, wizard, Some("alice"), true),
            Err(QueueError::InvalidArgument(
                "Can't specify a target and /all".into()
            ))
        );
        assert_eq!(
            do_halt(&mut queue, &mut world, alice, None, true),
            Err(QueueError::PermissionDenied)
        );
    }

    #[test]
    fn test_halt_reports_to_owner() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let gadget = world.add_thing("gadget", alice);
        let mut queue = queue();
        wait(&mut queue, &mut world, gadget, "30", "think a").unwrap();
        wait(&mut queue, &mut world, alice, "30", "think b").unwrap();

        // An object halting with no target only halts itself.
        assert_eq!(do_halt(&mut queue, &mut world, gadget, None, false), Ok(1));
        assert_eq!(world.take_messages(&alice), vec!["1 queue entries removed."]);
        assert_eq!(do_halt(&mut queue, &mut world, alice, None, false), Ok(1));
    }

    #[test]
    fn test_notify_messages() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        wait(&mut queue, &mut world, alice, "me", "think a").unwrap();
        do_notify(&mut queue, &mut world, alice, NotifyMode::First, "me", None, at(1)).unwrap();
        assert_eq!(world.take_messages(&alice), vec!["Notified."]);
        do_notify(&mut queue, &mut world, alice, NotifyMode::Quiet, "me", None, at(1)).unwrap();
        assert!(world.take_messages(&alice).is_empty());
        do_notify(&mut queue, &mut world, alice, NotifyMode::Drain, "me", None, at(1)).unwrap();
        assert_eq!(world.take_messages(&alice), vec!["Drained."]);
        // Non-positive counts are ignored outright.
        do_notify(&mut queue, &mut world, alice, NotifyMode::First, "me", Some("0"), at(1))
            .unwrap();
        assert!(world.take_messages(&alice).is_empty());
    }

    #[test]
    fn test_ps_listing() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        wait(&mut queue, &mut world, alice, "30", "think later").unwrap();
        wait(&mut queue, &mut world, alice, "me", "think blocked").unwrap();
        wait(&mut queue, &mut world, alice, "me/45", "think timed").unwrap();

        do_ps(&queue, &mut world, alice, None, false, PsMode::Long, at(0)).unwrap();
        assert_eq!(
            world.take_messages(&alice),
            vec![
                "----- Wait Queue -----",
                "[30]alice(#1):think later",
                "   Enactor: alice(#1); Arg0='first'",
                "----- Semaphore Queue -----",
                "[#1]alice(#1):think blocked",
                "   Enactor: alice(#1); Arg0='first'",
                "[#1/45]alice(#1):think timed",
                "   Enactor: alice(#1); Arg0='first'",
                "Totals: Wait Queue...1/1  Semaphores...2/2",
            ]
        );

        do_ps(&queue, &mut world, alice, None, false, PsMode::Summary, at(0)).unwrap();
        assert_eq!(
            world.take_messages(&alice),
            vec!["Totals: Wait Queue...1/1  Semaphores...2/2"]
        );
    }

    #[test]
    fn test_ps_for_wizard_shows_system_queue() {
        let mut world = MemoryWorld::new();
        let wizard = world.wizard();
        let alice = world.add_player("alice", 10);
        let mut queue = queue();
        queue.defer_system(at(60), waitq_common::tasks::SystemTask::IdleCheck);
        wait(&mut queue, &mut world, alice, "30", "think later").unwrap();

        do_ps(&queue, &mut world, wizard, None, false, PsMode::Brief, at(0)).unwrap();
        assert_eq!(
            world.take_messages(&wizard),
            vec![
                "----- System Queue -----",
                "[60]Check for idle players",
                "Totals: Wait Queue...0/1  Semaphores...0/0",
                "        System Tasks.....1",
            ]
        );

        do_ps(&queue, &mut world, wizard, None, true, PsMode::Brief, at(0)).unwrap();
        let lines = world.take_messages(&wizard);
        assert_eq!(lines[0], "----- Wait Queue -----");
        assert_eq!(lines[1], "[30]alice(#1):think later");
    }
}
