//! Market Scout - 市场调研深度智能体编排层
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、调研状态模型、会话上下文、优雅关闭
//! - **resilience**: 重试退避、熔断、回退与健康检查
//! - **monitor**: 会话性能快照、告警与仪表盘
//! - **mcp**: 工具服务器注册表、工具 trait 与内置工具
//! - **workflow**: 阶段追踪工作流引擎
//! - **orchestrator**: 调研图（规划 → 委派 → 执行 → 校验 → 综合 → 报告）
//! - **stream**: 会话状态事件广播

pub mod config;
pub mod core;
pub mod mcp;
pub mod monitor;
pub mod observability;
pub mod orchestrator;
pub mod resilience;
pub mod stream;
pub mod workflow;

pub use config::{load_config, AppConfig};
pub use orchestrator::{Orchestrator, RequestContext};
