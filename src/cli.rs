// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "bdeploy",
    version,
    about = "Master/slave deployment orchestrator over SSH"
)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Data directory (defaults to ./data next to the binary, then ~/.bdeploy)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured nodes, resources and tasks
    List,

    /// Probe connectivity of every configured node
    Ping {
        /// Username for nodes without stored credentials
        #[arg(short, long)]
        user: Option<String>,

        /// Password for nodes without stored credentials
        #[arg(long)]
        password: Option<String>,
    },

    /// Run a deployment task and stream its progress
    Run {
        /// Id of the stored task to execute
        task_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_parsing() {
        let cli = Cli::parse_from(["bdeploy", "-vv", "run", "task-1234"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Run { ref task_id } if task_id == "task-1234"));
    }

    #[test]
    fn test_ping_command_parsing() {
        let cli = Cli::parse_from(["bdeploy", "ping", "-u", "root", "--password", "pw"]);
        match cli.command {
            Commands::Ping { user, password } => {
                assert_eq!(user.as_deref(), Some("root"));
                assert_eq!(password.as_deref(), Some("pw"));
            }
            _ => panic!("expected ping"),
        }
    }

    #[test]
    fn test_data_dir_override() {
        let cli = Cli::parse_from(["bdeploy", "--data-dir", "/srv/bdeploy", "list"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/srv/bdeploy")));
    }
}
