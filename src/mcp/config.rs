//! MCP 服务器配置：传输方式、能力与所需的 API key 环境变量

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 服务器传输方式（TOML 中以 `type` 字段区分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Sse {
        url: String,
    },
    Http {
        url: String,
    },
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Stdio { .. } => "stdio",
            Transport::Sse { .. } => "sse",
            Transport::Http { .. } => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// 省略时取配置表中的键名
    #[serde(default)]
    pub name: String,
    pub transport: Transport,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// 启动前需要检查的环境变量
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl McpServerConfig {
    fn stdio(name: &str, command: &str, args: &[&str], capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: Transport::Stdio {
                command: command.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                env: BTreeMap::new(),
            },
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            api_key_env: None,
        }
    }

    fn with_api_key(mut self, env: &str) -> Self {
        self.api_key_env = Some(env.to_string());
        self
    }

    pub fn requires_api_key(&self) -> bool {
        self.api_key_env.is_some()
    }
}

pub const WEB_SEARCH_SERVER: &str = "web_search";
pub const VECTOR_STORE_SERVER: &str = "vector_store";
pub const BROWSER_SERVER: &str = "browser";
pub const REASONING_SERVER: &str = "reasoning";
pub const REPORT_SERVER: &str = "report";

/// 内置服务器注册表
pub fn default_servers() -> BTreeMap<String, McpServerConfig> {
    let servers = [
        McpServerConfig::stdio(
            WEB_SEARCH_SERVER,
            "npx",
            &["-y", "tavily-mcp"],
            &["search", "extract", "news"],
        )
        .with_api_key("TAVILY_API_KEY"),
        McpServerConfig::stdio(
            VECTOR_STORE_SERVER,
            "uvx",
            &["chroma-mcp"],
            &["store", "query", "similarity_search"],
        ),
        McpServerConfig::stdio(
            BROWSER_SERVER,
            "npx",
            &["-y", "@playwright/mcp"],
            &["navigate", "extract", "screenshot"],
        ),
        McpServerConfig::stdio(
            REASONING_SERVER,
            "npx",
            &["-y", "@modelcontextprotocol/server-sequential-thinking"],
            &["reasoning", "planning", "synthesis"],
        ),
        McpServerConfig::stdio(
            REPORT_SERVER,
            "npx",
            &["-y", "@modelcontextprotocol/server-filesystem", "./reports"],
            &["report", "export"],
        ),
    ];
    servers
        .into_iter()
        .map(|s| (s.name.clone(), s))
        .collect()
}
