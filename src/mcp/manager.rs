//! MCPServerManager：服务器注册表、运行状态与工具调用路由
//!
//! start_server 只登记运行状态；传输层进程的实际拉起不在本 crate 内。
//! execute_tool_call 按工具名找到所属服务器，未运行时惰性启动，再调用工具。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::core::ResearchState;
use crate::mcp::builtin::default_registry;
use crate::mcp::config::{default_servers, McpServerConfig};
use crate::mcp::tools::{McpTool, ToolRegistry};
use crate::monitor::PerformanceMonitor;
use crate::observability::audit_tool_call;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Unknown MCP tool: {0}")]
    UnknownTool(String),

    #[error("Unknown MCP server: {0}")]
    UnknownServer(String),

    #[error("Failed to start MCP server: {0}")]
    ServerStartFailed(String),

    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

/// 运行中服务器的状态记录
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub started_at: DateTime<Utc>,
    pub calls: u64,
}

/// 服务器列表项（CLI `servers` 子命令输出）
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub transport: &'static str,
    pub capabilities: Vec<String>,
    pub api_key_env: Option<String>,
    pub running: bool,
    pub tools: Vec<String>,
}

pub struct McpServerManager {
    servers: BTreeMap<String, McpServerConfig>,
    tools: RwLock<ToolRegistry>,
    active: RwLock<HashMap<String, ServerStatus>>,
    monitor: Option<PerformanceMonitor>,
}

impl McpServerManager {
    pub fn new(servers: BTreeMap<String, McpServerConfig>, tools: ToolRegistry) -> Self {
        Self {
            servers,
            tools: RwLock::new(tools),
            active: RwLock::new(HashMap::new()),
            monitor: None,
        }
    }

    /// 内置服务器 + `[mcp.servers.*]` 覆盖项，内置工具
    pub fn from_config(config: &AppConfig) -> Self {
        let mut servers = default_servers();
        for (key, server) in &config.mcp.servers {
            let mut server = server.clone();
            if server.name.is_empty() {
                server.name = key.clone();
            }
            servers.insert(key.clone(), server);
        }
        Self::new(servers, default_registry(config.research.thinking_depth))
    }

    /// 工具调用延迟与成败上报给性能监控
    pub fn with_monitor(mut self, monitor: PerformanceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// 注册或替换工具
    pub async fn register_tool(&self, tool: Arc<dyn McpTool>) {
        tracing::debug!(tool = tool.name(), server = tool.server(), "Registering MCP tool");
        self.tools.write().await.register_arc(tool);
    }

    pub fn server_config(&self, name: &str) -> Option<&McpServerConfig> {
        self.servers.get(name)
    }

    pub async fn start_server(&self, name: &str) -> bool {
        let Some(config) = self.servers.get(name) else {
            tracing::warn!(server = name, "No configuration for MCP server");
            return false;
        };

        if let Some(var) = &config.api_key_env {
            let present = std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false);
            if !present {
                tracing::warn!(
                    server = name,
                    env = %var,
                    "API key environment variable is not set; server calls may be rejected"
                );
            }
        }

        let mut active = self.active.write().await;
        if active.contains_key(name) {
            return true;
        }
        active.insert(
            name.to_string(),
            ServerStatus {
                started_at: Utc::now(),
                calls: 0,
            },
        );
        tracing::info!(
            server = name,
            transport = config.transport.kind(),
            "MCP server started"
        );
        true
    }

    pub async fn stop_server(&self, name: &str) -> bool {
        let removed = self.active.write().await.remove(name).is_some();
        if removed {
            tracing::info!(server = name, "MCP server stopped");
        }
        removed
    }

    /// 启动全部已配置服务器；单个失败不影响其他
    pub async fn start_all(&self) -> Vec<(String, bool)> {
        let names: Vec<String> = self.servers.keys().cloned().collect();
        let results = join_all(names.iter().map(|n| self.start_server(n))).await;
        names.into_iter().zip(results).collect()
    }

    pub async fn stop_all(&self) -> usize {
        let names: Vec<String> = self.active.read().await.keys().cloned().collect();
        let results = join_all(names.iter().map(|n| self.stop_server(n))).await;
        results.into_iter().filter(|stopped| *stopped).count()
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.active.read().await.contains_key(name)
    }

    pub async fn server_status(&self, name: &str) -> Option<ServerStatus> {
        self.active.read().await.get(name).cloned()
    }

    pub async fn running_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        let active = self.active.read().await;
        let tools = self.tools.read().await.tool_descriptions();
        self.servers
            .iter()
            .map(|(name, cfg)| ServerInfo {
                name: name.clone(),
                transport: cfg.transport.kind(),
                capabilities: cfg.capabilities.clone(),
                api_key_env: cfg.api_key_env.clone(),
                running: active.contains_key(name),
                tools: tools
                    .iter()
                    .filter(|(_, server, _)| server == name)
                    .map(|(tool, _, _)| tool.clone())
                    .collect(),
            })
            .collect()
    }

    pub async fn tool_schema_json(&self) -> String {
        self.tools.read().await.to_schema_json()
    }

    /// 调用命名工具；工具或服务器未知时报错，工具自身的错误原样传播
    pub async fn execute_tool_call(
        &self,
        tool_name: &str,
        params: Value,
        state: &ResearchState,
    ) -> Result<Value, McpError> {
        let tool = self
            .tools
            .read()
            .await
            .get(tool_name)
            .ok_or_else(|| McpError::UnknownTool(tool_name.to_string()))?;
        let server = tool.server().to_string();
        if !self.servers.contains_key(&server) {
            return Err(McpError::UnknownServer(server));
        }
        if !self.is_running(&server).await && !self.start_server(&server).await {
            return Err(McpError::ServerStartFailed(server));
        }

        let started = Instant::now();
        let result = tool.execute(params.clone(), state).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        audit_tool_call(tool_name, &server, result.is_ok(), duration_ms, &params);
        if let Some(monitor) = &self.monitor {
            monitor.record_mcp_call(&server, duration_ms as f64, result.is_ok());
        }
        if let Some(status) = self.active.write().await.get_mut(&server) {
            status.calls += 1;
        }

        result.map_err(McpError::Handler)
    }
}
