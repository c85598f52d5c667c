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

use clap::builder::ValueHint;
use clap_derive::Parser;
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use waitq_kernel::config::{Config, QueueConfig};

#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(name = "waitq-admin")]
#[command(about = "Console for the deferred command queue", long_about = None)]
pub struct Args {
    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML) file to use, if any. If not specified, defaults are used.\
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(
        long,
        value_name = "player",
        help = "Name of the player to act as; created if it does not exist",
        default_value = "Wizard"
    )]
    pub player: String,

    #[command(flatten)]
    pub queue_args: QueueArgs,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

#[derive(Parser, Debug, Serialize, Deserialize)]
pub struct QueueArgs {
    #[arg(
        long,
        value_name = "queue-chunk",
        help = "Number of ready commands run per scheduler tick"
    )]
    pub queue_chunk: Option<usize>,

    #[arg(
        long,
        value_name = "wait-cost",
        help = "Deposit charged for each queued command, refunded when it runs"
    )]
    pub wait_cost: Option<i64>,

    #[arg(
        long,
        value_name = "queue-max",
        help = "Most commands an unprivileged owner may have outstanding"
    )]
    pub queue_max: Option<i64>,
}

impl QueueArgs {
    pub fn merge_config(&self, config: &mut QueueConfig) -> Result<(), eyre::Report> {
        if let Some(chunk) = self.queue_chunk {
            config.queue_chunk = chunk;
        }
        if let Some(cost) = self.wait_cost {
            if cost < 0 {
                return Err(eyre!("wait cost cannot be negative: {cost}"));
            }
            config.wait_cost = cost;
        }
        if let Some(max) = self.queue_max {
            config.queue_max = max;
        }
        Ok(())
    }
}

impl Args {
    fn merge_config(&self, mut config: Config) -> Result<Config, eyre::Report> {
        self.queue_args.merge_config(&mut config.queue)?;
        Ok(config)
    }

    /// Load the configuration file if we have it, and then merge the arguments into it.
    pub fn load_config(&self) -> Result<Arc<Config>, eyre::Report> {
        let config = match &self.config_file {
            Some(config_path) => Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(config_path))
                .extract::<Config>()
                .map_err(|e| {
                    eyre!(
                        "Failed to parse configuration from {:?}: {}",
                        config_path,
                        e
                    )
                })?,
            None => Config::default(),
        };
        Ok(Arc::new(self.merge_config(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_without_config_file() {
        let args = Args::parse_from(["waitq-admin"]);
        assert_eq!(args.player, "Wizard");
        assert_eq!(*args.load_config().unwrap(), Config::default());
    }

    #[test]
    fn test_file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue:\n  wait_cost: 5\n  queue_max: 7").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from(["waitq-admin", "--config-file", &path, "--queue-max", "9"]);
        let config = args.load_config().unwrap();
        assert_eq!(config.queue.wait_cost, 5);
        assert_eq!(config.queue.queue_max, 9);
        assert_eq!(config.queue.queue_chunk, QueueConfig::default().queue_chunk);
    }

    #[test]
    fn test_bad_config_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue:\n  wait_cost: lots").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = Args::parse_from(["waitq-admin", "--config-file", &path]);
        assert!(args.load_config().is_err());
    }

    #[test]
    fn test_negative_wait_cost_rejected() {
        let args = Args::parse_from(["waitq-admin", "--wait-cost=-1"]);
        assert!(args.load_config().is_err());
    }
}
