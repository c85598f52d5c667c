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

use thiserror::Error;

use crate::model::WorldStateError;

/// Why a queue operation was refused.
///
/// None of these are fatal: they are reported back to whoever asked, and apart from the
/// runaway halt that accompanies `QuotaExceeded`, the queue is left as it was.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum QueueError {
    #[error("Permission denied.")]
    PermissionDenied,
    #[error("Not enough money to queue command.")]
    InsufficientFunds,
    #[error("Run away objects: too many commands queued.  Halted.")]
    QuotaExceeded,
    #[error("No match.")]
    NoSuchTarget,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Executor is halted")]
    ExecutorHalted,
    #[error("Command interpretation is disabled")]
    InterpretationDisabled,
}

impl From<WorldStateError> for QueueError {
    fn from(value: WorldStateError) -> Self {
        match value {
            WorldStateError::ObjectNotFound(_) => QueueError::NoSuchTarget,
            WorldStateError::InvalidAttribute(_) => {
                QueueError::InvalidArgument("Invalid attribute.".to_string())
            }
            WorldStateError::PermissionDenied => QueueError::PermissionDenied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NOTHING;

    #[test]
    fn test_world_state_errors_map_to_queue_errors() {
        assert_eq!(
            QueueError::from(WorldStateError::ObjectNotFound(NOTHING)),
            QueueError::NoSuchTarget
        );
        assert_eq!(
            QueueError::from(WorldStateError::InvalidAttribute("1bad".into())),
            QueueError::InvalidArgument("Invalid attribute.".into())
        );
        assert_eq!(
            QueueError::from(WorldStateError::PermissionDenied),
            QueueError::PermissionDenied
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            QueueError::InsufficientFunds.to_string(),
            "Not enough money to queue command."
        );
        assert_eq!(
            QueueError::InvalidArgument("Can't specify a target and /all".into()).to_string(),
            "Can't specify a target and /all"
        );
    }
}
