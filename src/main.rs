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

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;

use bdeploy::cli::{Cli, Commands};
use bdeploy::model::{ConnectionStatus, TaskRunRequest, TaskStatus};
use bdeploy::pipeline::{ChannelSink, PipelineEngine};
use bdeploy::ssh::{Prober, SshDialer};
use bdeploy::utils::{default_data_dir, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let data_dir: PathBuf = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    let (sink, mut events) = ChannelSink::new();
    let engine = PipelineEngine::open(&data_dir, Arc::new(sink))
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;

    match cli.command {
        Commands::List => {
            list_records(&engine)?;
        }
        Commands::Ping { user, password } => {
            let prober = Arc::new(Prober::new(
                Arc::new(SshDialer),
                Arc::clone(engine.vault()),
            ));
            let nodes = engine.nodes().list()?;
            if nodes.is_empty() {
                println!("No nodes configured");
                return Ok(());
            }

            println!("Pinging {} nodes...\n", nodes.len());
            let results = prober
                .batch_test(
                    &nodes,
                    user.as_deref().unwrap_or(""),
                    password.as_deref().unwrap_or(""),
                )
                .await;

            let mut success_count = 0;
            let mut failed_count = 0;
            for node in &nodes {
                match results.get(&node.id) {
                    Some(status) if status.status == ConnectionStatus::Connected => {
                        success_count += 1;
                        println!(
                            "{} {} - {} ({}ms)",
                            "✓".green(),
                            node,
                            "Connected".green(),
                            status.latency
                        );
                    }
                    Some(status) => {
                        failed_count += 1;
                        println!("{} {} - {}", "✗".red(), node, "Failed".red());
                        if !status.error_msg.is_empty() {
                            println!("  Error: {}", status.error_msg);
                        }
                    }
                    None => {
                        failed_count += 1;
                        println!("{} {} - no result", "✗".red(), node);
                    }
                }
            }

            println!("\nSummary: {success_count} successful, {failed_count} failed");
            if failed_count > 0 {
                std::process::exit(1);
            }
        }
        Commands::Run { task_id } => {
            let task = engine
                .tasks()
                .get_task(&task_id)
                .with_context(|| format!("unknown task: {task_id}"))?;

            println!(
                "{} {} {}\n",
                "▶".cyan(),
                "Running task".cyan().bold(),
                task.name.yellow()
            );

            let _worker = engine.execute_task(TaskRunRequest::from_task(&task))?;

            // The worker owns the run; we just drain the event queue.
            while let Some(event) = events.recv().await {
                println!("[{:>3}%] {} {}", event.progress, event.status, event.log);
                if event.status.is_terminal() {
                    if event.status == TaskStatus::Failed {
                        std::process::exit(1);
                    }
                    break;
                }
            }
        }
    }

    Ok(())
}

fn list_records(engine: &Arc<PipelineEngine>) -> Result<()> {
    let nodes = engine.nodes().list()?;
    println!("Nodes ({}):", nodes.len());
    for node in &nodes {
        let role = if node.is_master { "master" } else { "slave" };
        println!("  {} [{}] {} ({})", node.id, role, node, node.protocol);
    }

    let resources = engine.resources().list()?;
    println!("\nSVN resources ({}):", resources.len());
    for resource in &resources {
        println!(
            "  {} {} r{} ({:?})",
            resource.id, resource.url, resource.revision, resource.status
        );
    }

    let tasks = engine.tasks().list_tasks()?;
    println!("\nTasks ({}):", tasks.len());
    for task in &tasks {
        println!(
            "  {} {} [{}] {} slave(s)",
            task.id,
            task.name,
            task.status,
            task.slave_server_ids.len()
        );
    }

    Ok(())
}
