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

use enum_primitive_derive::Primitive;
use strum::{Display, EnumString};

/// Flags carried by every object in the world that the command queue cares about.
#[derive(
    Debug, Ord, PartialOrd, Copy, Clone, Eq, PartialEq, Hash, Primitive, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum ObjFlag {
    /// The object is a player, and so owns itself for billing purposes.
    Player = 0,
    /// Privileged: sees every queue, halts anything, higher quota.
    Wizard = 1,
    /// Commands from this object may not be queued or run.
    Halted = 2,
    /// The object is being destroyed.
    Going = 3,
    /// Suppresses informational replies.
    Quiet = 4,
    /// Anyone may wait or notify on this object.
    LinkOk = 5,
    /// May halt other players' objects without being a wizard.
    CanHalt = 6,
    /// May list every queue without being a wizard.
    SeeQueue = 7,
}
