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

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The "system" object; by convention the first player created in a fresh world.
pub const SYSTEM_OBJECT: Obj = Obj::mk_id(0);

/// Used throughout to refer to a missing object value.
pub const NOTHING: Obj = Obj::mk_id(-1);

/// A stable reference to an in-world entity: a player, a thing, or the originator of a
/// causal chain of commands.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default,
)]
pub struct Obj(i32);

impl Obj {
    pub const fn mk_id(id: i32) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> i32 {
        self.0
    }

    #[must_use]
    pub fn to_literal(&self) -> String {
        format!("#{}", self.0)
    }

    pub fn is_nothing(&self) -> bool {
        self.0 == -1
    }

    /// Negative ids never name a real object.
    pub fn is_positive(&self) -> bool {
        self.0 >= 0
    }
}

impl Display for Obj {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("Not an object literal: {0:?}")]
pub struct ObjParseError(String);

impl FromStr for Obj {
    type Err = ObjParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some(digits) = value.strip_prefix('#') else {
            return Err(ObjParseError(value.to_string()));
        };
        digits
            .parse::<i32>()
            .map(Self::mk_id)
            .map_err(|_| ObjParseError(value.to_string()))
    }
}
