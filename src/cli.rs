//! 命令行参数

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use market_scout::RequestContext;

/// Market Scout - 市场调研深度智能体
#[derive(Parser, Debug)]
#[command(name = "market-scout")]
#[command(about = "Plan, delegate, execute and report market research with a multi-agent graph")]
#[command(version)]
pub struct Args {
    /// 配置文件路径（叠加在 config/default.toml 之上）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 运行一次调研请求
    Research {
        /// 调研问题，如 "Analyze the coffee market"
        query: String,

        /// 行业
        #[arg(long)]
        sector: Option<String>,

        /// 目标市场
        #[arg(long)]
        market: Option<String>,

        /// 调研目标，可重复
        #[arg(long = "objective")]
        objectives: Vec<String>,

        /// 导出虚拟文件（final_report.md 等）的目录，覆盖配置中的 app.output_dir
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 输出完整 ResearchState JSON 而不是报告
        #[arg(long)]
        json: bool,
    },
    /// 列出 MCP 服务器与工具
    Servers,
}

impl Command {
    /// research 子命令的请求背景
    pub fn request_context(&self) -> Option<RequestContext> {
        match self {
            Command::Research {
                sector,
                market,
                objectives,
                ..
            } => Some(RequestContext {
                industry_sector: sector.clone(),
                target_market: market.clone(),
                objectives: objectives.clone(),
            }),
            Command::Servers => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_research_arguments() {
        let args = Args::try_parse_from([
            "market-scout",
            "research",
            "Analyze the coffee market",
            "--sector",
            "Food & Beverage",
            "--objective",
            "market size",
            "--objective",
            "key competitors",
            "--json",
        ])
        .unwrap();

        let ctx = args.command.request_context().unwrap();
        assert_eq!(ctx.industry_sector.as_deref(), Some("Food & Beverage"));
        assert_eq!(ctx.objectives, vec!["market size", "key competitors"]);
        match args.command {
            Command::Research { query, json, output, .. } => {
                assert_eq!(query, "Analyze the coffee market");
                assert!(json);
                assert!(output.is_none());
            }
            Command::Servers => panic!("expected research"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let args = Args::try_parse_from(["market-scout", "servers", "--config", "custom.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("custom.toml")));
        assert!(args.command.request_context().is_none());
    }

    #[test]
    fn test_research_requires_query() {
        assert!(Args::try_parse_from(["market-scout", "research"]).is_err());
    }
}
