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

//! Config is created by the host, and handed to the command queue, whereupon it is available to
//! all queue operations. Used to hold things typically configured by CLI flags or a config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use waitq_common::tasks::SystemTask;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Charged to the billing owner when a command is queued, given back when it runs or is
    /// cancelled.
    pub wait_cost: i64,
    /// One in this many queued commands costs one extra unit, kept for good. Zero disables.
    pub machine_cost: u32,
    /// Most commands an unprivileged owner may have outstanding.
    pub queue_max: i64,
    /// Most pipe stages in front of a single command segment.
    pub pipe_nest_limit: usize,
    /// Queued commands running at least this long get logged.
    pub max_command_secs: u64,
    /// Ready entries run per scheduler tick.
    pub queue_chunk: usize,
    pub dump_interval_secs: u64,
    pub check_interval_secs: u64,
    pub idle_check_interval_secs: u64,
    pub events_interval_secs: u64,
    pub cache_tick_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_cost: 10,
            machine_cost: 64,
            queue_max: 100,
            pipe_nest_limit: 20,
            max_command_secs: 120,
            queue_chunk: 3,
            dump_interval_secs: 3600,
            check_interval_secs: 600,
            idle_check_interval_secs: 60,
            events_interval_secs: 60,
            cache_tick_interval_secs: 0,
        }
    }
}

impl QueueConfig {
    pub fn max_command_duration(&self) -> Duration {
        Duration::from_secs(self.max_command_secs)
    }

    /// How often a given system dispatch recurs, or `None` if it is switched off.
    /// `ProcessCommand` is driven by input, not a timer, so it never recurs.
    pub fn interval_of(&self, task: SystemTask) -> Option<Duration> {
        let secs = match task {
            SystemTask::DatabaseDump => self.dump_interval_secs,
            SystemTask::FreeListReconstruction => self.check_interval_secs,
            SystemTask::IdleCheck => self.idle_check_interval_secs,
            SystemTask::CheckEvents => self.events_interval_secs,
            SystemTask::CacheTick => self.cache_tick_interval_secs,
            SystemTask::ProcessCommand => 0,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals() {
        let config = QueueConfig::default();
        assert_eq!(
            config.interval_of(SystemTask::DatabaseDump),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(config.interval_of(SystemTask::CacheTick), None);
        assert_eq!(config.interval_of(SystemTask::ProcessCommand), None);
    }
}
