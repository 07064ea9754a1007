//! MCP 工具注册表
//!
//! 所有工具实现 McpTool trait（name / description / server / execute），由 ToolRegistry 按名注册与查找；
//! execute 拿到当前 ResearchState 的只读引用。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::Value;

use crate::core::ResearchState;

#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 所属服务器名（MCPServerManager 据此惰性启动服务器）
    fn server(&self) -> &str;

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, params: Value, state: &ResearchState) -> anyhow::Result<Value>;
}

/// 由参数结构体生成 JSON Schema
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn McpTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl McpTool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 同名工具会被替换
    pub fn register_arc(&mut self, tool: Arc<dyn McpTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// (name, server, description)，按名称排序
    pub fn tool_descriptions(&self) -> Vec<(String, String, String)> {
        let mut out: Vec<(String, String, String)> = self
            .tools
            .values()
            .map(|t| {
                (
                    t.name().to_string(),
                    t.server().to_string(),
                    t.description().to_string(),
                )
            })
            .collect();
        out.sort();
        out
    }

    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "server": tool.server(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
