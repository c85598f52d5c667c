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

use std::marker::PhantomData;

use num_traits::ToPrimitive;

/// Object flags packed into a word, indexed by the flag enum's discriminant.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct BitEnum<T: ToPrimitive> {
    bits: u16,
    flag: PhantomData<T>,
}

impl<T: ToPrimitive> BitEnum<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: 0,
            flag: PhantomData,
        }
    }

    pub fn new_with(flag: T) -> Self {
        let mut flags = Self::new();
        flags.assign(flag, true);
        flags
    }

    // Discriminants past 15 share the top bit.
    fn mask(flag: &T) -> u16 {
        1 << flag.to_u8().map_or(15, |d| d.min(15))
    }

    pub fn assign(&mut self, flag: T, on: bool) {
        let mask = Self::mask(&flag);
        if on {
            self.bits |= mask;
        } else {
            self.bits &= !mask;
        }
    }

    pub fn contains(&self, flag: T) -> bool {
        self.bits & Self::mask(&flag) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

impl<T: ToPrimitive> Default for BitEnum<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToPrimitive> From<T> for BitEnum<T> {
    fn from(flag: T) -> Self {
        Self::new_with(flag)
    }
}
