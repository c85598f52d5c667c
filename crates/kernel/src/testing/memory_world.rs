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

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use waitq_common::model::{
    ObjFlag, QUEUE_COUNT_ATTR, QUEUE_MAX_ATTR, SEMAPHORE_ATTR, WorldState, WorldStateError,
};
use waitq_common::tasks::SystemTask;
use waitq_common::util::BitEnum;
use waitq_common::{NOTHING, Obj};

struct ObjectRecord {
    name: String,
    owner: Obj,
    flags: BitEnum<ObjFlag>,
    balance: i64,
    attrs: HashMap<String, String>,
    cpu_used: Duration,
}

/// A world that lives entirely in memory: objects are numbered in creation order, attribute
/// names are case-insensitive, and everything sent to a player is kept for inspection.
pub struct MemoryWorld {
    objects: Vec<Option<ObjectRecord>>,
    defined_attrs: HashSet<String>,
    messages: HashMap<Obj, Vec<String>>,
    system_tasks: Vec<SystemTask>,
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_attr_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl MemoryWorld {
    /// A world holding only `#0`, a privileged player called Wizard.
    pub fn new() -> Self {
        let mut world = Self {
            objects: vec![],
            defined_attrs: [SEMAPHORE_ATTR, QUEUE_COUNT_ATTR, QUEUE_MAX_ATTR]
                .into_iter()
                .map(str::to_string)
                .collect(),
            messages: HashMap::new(),
            system_tasks: vec![],
        };
        let wizard = world.add_player("Wizard", 0);
        world.set_flag(&wizard, ObjFlag::Wizard, true);
        world
    }

    pub fn wizard(&self) -> Obj {
        Obj::mk_id(0)
    }

    fn create(
        &mut self,
        name: &str,
        owner: Option<Obj>,
        flags: BitEnum<ObjFlag>,
        balance: i64,
    ) -> Obj {
        let obj = Obj::mk_id(self.objects.len() as i32);
        self.objects.push(Some(ObjectRecord {
            name: name.to_string(),
            owner: owner.unwrap_or(obj),
            flags,
            balance,
            attrs: HashMap::new(),
            cpu_used: Duration::ZERO,
        }));
        obj
    }

    pub fn add_player(&mut self, name: &str, balance: i64) -> Obj {
        self.create(name, None, BitEnum::new_with(ObjFlag::Player), balance)
    }

    pub fn add_thing(&mut self, name: &str, owner: Obj) -> Obj {
        self.create(name, Some(owner), BitEnum::new(), 0)
    }

    fn get(&self, obj: &Obj) -> Option<&ObjectRecord> {
        if !obj.is_positive() {
            return None;
        }
        self.objects.get(obj.id() as usize)?.as_ref()
    }

    fn get_mut(&mut self, obj: &Obj) -> Option<&mut ObjectRecord> {
        if !obj.is_positive() {
            return None;
        }
        self.objects.get_mut(obj.id() as usize)?.as_mut()
    }

    pub fn has_flag(&self, obj: &Obj, flag: ObjFlag) -> bool {
        self.get(obj).is_some_and(|o| o.flags.contains(flag))
    }

    pub fn set_flag(&mut self, obj: &Obj, flag: ObjFlag, on: bool) {
        if let Some(o) = self.get_mut(obj) {
            o.flags.assign(flag, on);
        }
    }

    /// Remove an object for good. Its number is never reused.
    pub fn destroy(&mut self, obj: &Obj) {
        if obj.is_positive()
            && let Some(slot) = self.objects.get_mut(obj.id() as usize)
        {
            *slot = None;
        }
    }

    pub fn balance(&self, obj: &Obj) -> i64 {
        self.get(obj).map_or(0, |o| o.balance)
    }

    pub fn set_balance(&mut self, obj: &Obj, balance: i64) {
        if let Some(o) = self.get_mut(obj) {
            o.balance = balance;
        }
    }

    pub fn cpu_used(&self, obj: &Obj) -> Duration {
        self.get(obj).map_or(Duration::ZERO, |o| o.cpu_used)
    }

    /// Everything sent to `who` so far.
    pub fn messages(&self, who: &Obj) -> &[String] {
        self.messages.get(who).map(Vec::as_slice).unwrap_or_default()
    }

    /// Everything sent to `who` since the last call.
    pub fn take_messages(&mut self, who: &Obj) -> Vec<String> {
        self.messages.remove(who).unwrap_or_default()
    }

    /// Everything sent to anyone since the last call, grouped by recipient.
    pub fn take_all_messages(&mut self) -> Vec<(Obj, Vec<String>)> {
        let mut all: Vec<_> = self.messages.drain().collect();
        all.sort_by_key(|(who, _)| *who);
        all
    }

    pub fn system_tasks_run(&self) -> Vec<SystemTask> {
        self.system_tasks.clone()
    }

    /// Look an object up by exact (case-insensitive) name.
    pub fn find(&self, name: &str) -> Option<Obj> {
        self.objects.iter().enumerate().find_map(|(i, o)| {
            o.as_ref()
                .filter(|o| o.name.eq_ignore_ascii_case(name))
                .map(|_| Obj::mk_id(i as i32))
        })
    }
}

impl WorldState for MemoryWorld {
    fn valid(&self, obj: &Obj) -> bool {
        self.get(obj).is_some()
    }

    fn is_player(&self, obj: &Obj) -> bool {
        self.has_flag(obj, ObjFlag::Player)
    }

    fn is_going(&self, obj: &Obj) -> bool {
        self.has_flag(obj, ObjFlag::Going)
    }

    fn is_halted(&self, obj: &Obj) -> bool {
        self.has_flag(obj, ObjFlag::Halted)
    }

    fn set_halted(&mut self, obj: &Obj, halted: bool) {
        self.set_flag(obj, ObjFlag::Halted, halted);
    }

    fn is_quiet(&self, obj: &Obj) -> bool {
        self.has_flag(obj, ObjFlag::Quiet)
    }

    fn owner_of(&self, obj: &Obj) -> Obj {
        self.get(obj).map_or(NOTHING, |o| o.owner)
    }

    fn is_privileged(&self, obj: &Obj) -> bool {
        self.has_flag(obj, ObjFlag::Wizard) || self.has_flag(&self.owner_of(obj), ObjFlag::Wizard)
    }

    fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn name_of(&self, obj: &Obj) -> String {
        match self.get(obj) {
            Some(o) => format!("{}({obj})", o.name),
            None => "*NOTHING*".to_string(),
        }
    }

    fn match_thing(&self, who: &Obj, name: &str) -> Option<Obj> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("me") {
            return Some(*who);
        }
        if let Ok(obj) = name.parse::<Obj>() {
            return self.valid(&obj).then_some(obj);
        }
        self.find(name)
    }

    fn controls(&self, who: &Obj, what: &Obj) -> bool {
        self.valid(what)
            && (self.is_privileged(who) || self.owner_of(who) == self.owner_of(what))
    }

    fn link_ok(&self, what: &Obj) -> bool {
        self.has_flag(what, ObjFlag::LinkOk)
    }

    fn can_halt(&self, who: &Obj) -> bool {
        self.is_privileged(who) || self.has_flag(who, ObjFlag::CanHalt)
    }

    fn can_see_queue(&self, who: &Obj) -> bool {
        self.is_privileged(who) || self.has_flag(who, ObjFlag::SeeQueue)
    }

    fn can_set_attr(&self, who: &Obj, what: &Obj, _attr: &str) -> bool {
        self.controls(who, what)
    }

    fn credit(&mut self, who: &Obj, amount: i64) {
        if let Some(o) = self.get_mut(who) {
            o.balance += amount;
        }
    }

    fn debit(&mut self, who: &Obj, amount: i64) -> bool {
        if self.is_privileged(who) {
            return true;
        }
        match self.get_mut(who) {
            Some(o) if o.balance >= amount => {
                o.balance -= amount;
                true
            }
            _ => false,
        }
    }

    fn charge_cpu(&mut self, obj: &Obj, used: Duration) {
        if let Some(o) = self.get_mut(obj) {
            o.cpu_used += used;
        }
    }

    fn attr_get(&self, obj: &Obj, attr: &str) -> Option<String> {
        self.get(obj)?
            .attrs
            .get(&attr.to_ascii_uppercase())
            .cloned()
    }

    fn attr_set(&mut self, obj: &Obj, attr: &str, value: &str) {
        let attr = attr.to_ascii_uppercase();
        if let Some(o) = self.get_mut(obj) {
            o.attrs.insert(attr, value.to_string());
        }
    }

    fn attr_clear(&mut self, obj: &Obj, attr: &str) {
        if let Some(o) = self.get_mut(obj) {
            o.attrs.remove(&attr.to_ascii_uppercase());
        }
    }

    fn attr_defined(&self, attr: &str) -> bool {
        self.defined_attrs.contains(&attr.to_ascii_uppercase())
    }

    fn define_attr(&mut self, attr: &str) -> Result<(), WorldStateError> {
        if !valid_attr_name(attr) {
            return Err(WorldStateError::InvalidAttribute(attr.to_string()));
        }
        self.defined_attrs.insert(attr.to_ascii_uppercase());
        Ok(())
    }

    fn notify(&mut self, who: &Obj, message: &str) {
        self.messages
            .entry(*who)
            .or_default()
            .push(message.to_string());
    }

    fn run_system_task(&mut self, task: SystemTask) {
        self.system_tasks.push(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_and_billing() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 5);
        let widget = world.add_thing("widget", alice);
        assert_eq!(world.owner_of(&alice), alice);
        assert_eq!(world.billing_owner(&widget), alice);
        assert!(world.controls(&alice, &widget));
        assert!(!world.controls(&alice, &world.wizard()));
        assert!(world.controls(&world.wizard(), &widget));
    }

    #[test]
    fn test_debit_refuses_overdraft() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 5);
        assert!(world.debit(&alice, 5));
        assert!(!world.debit(&alice, 1));
        assert_eq!(world.balance(&alice), 0);
        assert!(world.debit(&world.wizard(), 1_000));
    }

    #[test]
    fn test_matching() {
        let mut world = MemoryWorld::new();
        let alice = world.add_player("alice", 5);
        let widget = world.add_thing("Widget", alice);
        assert_eq!(world.match_thing(&alice, "me"), Some(alice));
        assert_eq!(world.match_thing(&alice, "widget"), Some(widget));
        assert_eq!(world.match_thing(&alice, "#1"), Some(alice));
        assert_eq!(world.match_thing(&alice, "#99"), None);
        world.destroy(&widget);
        assert_eq!(world.match_thing(&alice, "widget"), None);
        assert!(!world.valid(&widget));
    }

    #[test]
    fn test_attribute_definitions() {
        let mut world = MemoryWorld::new();
        assert!(world.attr_defined("semaphore"));
        assert!(!world.attr_defined("DOORBELL"));
        assert!(world.define_attr("doorbell").is_ok());
        assert!(world.attr_defined("DOORBELL"));
        assert!(world.define_attr("1bad").is_err());
    }
}
