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

use std::time::Duration;

use thiserror::Error;

use crate::Obj;
use crate::tasks::SystemTask;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldStateError {
    #[error("Object not found: {0}")]
    ObjectNotFound(Obj),
    #[error("Invalid attribute name: {0}")]
    InvalidAttribute(String),
    #[error("Permission denied")]
    PermissionDenied,
}

/// Everything the command queue needs from the world around it: identity and permission
/// queries, the currency ledger, the attribute store, and a way to talk to players.
///
/// The queue never caches any of this; every answer is asked for at the moment it matters.
pub trait WorldState {
    // Identity

    /// Whether `obj` names an object that currently exists.
    fn valid(&self, obj: &Obj) -> bool;

    fn is_player(&self, obj: &Obj) -> bool;

    /// The object is in the process of being destroyed.
    fn is_going(&self, obj: &Obj) -> bool;

    /// The object may not queue or run commands.
    fn is_halted(&self, obj: &Obj) -> bool;

    fn set_halted(&mut self, obj: &Obj, halted: bool);

    fn is_quiet(&self, obj: &Obj) -> bool;

    /// Get the owner of an object. Players own themselves.
    fn owner_of(&self, obj: &Obj) -> Obj;

    /// The identity that pays for, and is charged quota for, commands run by `obj`: a player is
    /// billed itself, anything else its owner.
    fn billing_owner(&self, obj: &Obj) -> Obj {
        if self.is_player(obj) {
            *obj
        } else {
            self.owner_of(obj)
        }
    }

    fn is_privileged(&self, obj: &Obj) -> bool;

    /// Number of objects in the world; privileged owners may queue one more than this.
    fn object_count(&self) -> usize;

    /// Display form of an object for listings, e.g. `Widget(#12)`.
    fn name_of(&self, obj: &Obj) -> String;

    /// Resolve `name` from the point of view of `who`. `None` when nothing matches.
    fn match_thing(&self, who: &Obj, name: &str) -> Option<Obj>;

    // Permissions

    /// Either `who` is privileged, or owns `what`.
    fn controls(&self, who: &Obj, what: &Obj) -> bool;

    /// Anyone may wait on or notify `what`.
    fn link_ok(&self, what: &Obj) -> bool;

    fn can_halt(&self, who: &Obj) -> bool;

    fn can_see_queue(&self, who: &Obj) -> bool;

    fn can_set_attr(&self, who: &Obj, what: &Obj, attr: &str) -> bool;

    // Ledger

    fn credit(&mut self, who: &Obj, amount: i64);

    /// Take `amount` from `who`. Returns false, and takes nothing, if they cannot afford it.
    fn debit(&mut self, who: &Obj, amount: i64) -> bool;

    /// Add processor time to the object's lifetime usage.
    fn charge_cpu(&mut self, obj: &Obj, used: Duration);

    // Attributes

    fn attr_get(&self, obj: &Obj, attr: &str) -> Option<String>;

    fn attr_set(&mut self, obj: &Obj, attr: &str, value: &str);

    fn attr_clear(&mut self, obj: &Obj, attr: &str);

    /// Whether an attribute with this name has been defined anywhere.
    fn attr_defined(&self, attr: &str) -> bool;

    /// Define a new attribute name so it may be set on objects.
    fn define_attr(&mut self, attr: &str) -> Result<(), WorldStateError>;

    // Output and housekeeping

    fn notify(&mut self, who: &Obj, message: &str);

    /// Carry out one of the server's periodic maintenance jobs.
    fn run_system_task(&mut self, task: SystemTask);
}
