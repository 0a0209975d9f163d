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

//! Standalone sync helper pushed to the master host.
//!
//! Usage: `bdeploy-syncd [--version] [--payload <base64-json>]`.
//! Exit codes: 0 success, 2 bad usage/payload, 3 missing slave password,
//! 4 connection failure, 5 upload failure.

use clap::Parser;

use bdeploy::syncd::runner::{self, exit_code};
use bdeploy::syncd::VERSION;

#[derive(Parser, Debug)]
#[command(name = "bdeploy-syncd", disable_version_flag = true)]
struct Args {
    /// Print the helper version and exit.
    #[arg(long)]
    version: bool,

    /// Base64-encoded fan-out job.
    #[arg(long)]
    payload: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.version {
        println!("{VERSION}");
        return;
    }

    let payload = match args.payload {
        Some(ref p) if !p.trim().is_empty() => p,
        _ => {
            eprintln!("missing --payload");
            std::process::exit(exit_code::USAGE);
        }
    };

    std::process::exit(runner::run(payload).await);
}
