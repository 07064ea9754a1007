//! 可观测性：tracing 订阅器初始化
//!
//! 默认 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=market_scout=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化全局日志；重复调用时忽略（测试中多次初始化不会 panic）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// 工具调用审计行：与工具执行结果一起输出为单行 JSON
pub fn audit_tool_call(tool: &str, server: &str, ok: bool, duration_ms: u64, args: &serde_json::Value) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "server": server,
        "ok": ok,
        "duration_ms": duration_ms,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_preview_truncates_long_args() {
        let long = serde_json::json!({ "query": "x".repeat(500) });
        let preview = args_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 203);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init();
    }
}
