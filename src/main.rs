//! Market Scout 命令行入口
//!
//! 初始化日志、加载配置、创建编排器，运行一次调研并打印或导出报告。

mod cli;

use std::path::Path;

use anyhow::Context;
use clap::Parser;

use market_scout::core::ResearchState;
use market_scout::orchestrator::FINAL_REPORT_FILE;
use market_scout::{load_config, observability, Orchestrator};

use cli::{Args, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = Args::parse();
    let config = load_config(args.config.clone()).context("Failed to load configuration")?;
    let default_output = config.app.output_dir.clone();
    let orchestrator = Orchestrator::new(config);

    match &args.command {
        Command::Servers => {
            for server in orchestrator.mcp().list_servers().await {
                println!(
                    "{:<14} {:<6} tools: {}",
                    server.name,
                    server.transport,
                    server.tools.join(", ")
                );
            }
        }
        Command::Research {
            query, output, json, ..
        } => {
            orchestrator.shutdown_manager().install_signal_handlers();
            let context = args.command.request_context().unwrap_or_default();

            let state = orchestrator
                .process_research_request(query, context, None)
                .await
                .context("Research request failed")?;

            if let Some(dir) = output.clone().or(default_output) {
                write_files(&dir, &state)?;
                tracing::info!(dir = %dir.display(), files = state.files.len(), "Research files exported");
            }

            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&state).context("Failed to serialize state")?
                );
            } else if let Some(report) = state.files.get(FINAL_REPORT_FILE) {
                println!("{}", report);
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// 把虚拟文件系统写到磁盘
fn write_files(dir: &Path, state: &ResearchState) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    for (name, content) in &state.files {
        let path = dir.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}
