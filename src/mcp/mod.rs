//! MCP 工具服务器集成：服务器配置、工具注册表、内置工具与管理器

pub mod builtin;
pub mod config;
pub mod manager;
pub mod tools;

pub use config::{default_servers, McpServerConfig, Transport};
pub use manager::{McpError, McpServerManager, ServerInfo, ServerStatus};
pub use tools::{McpTool, ToolRegistry};
