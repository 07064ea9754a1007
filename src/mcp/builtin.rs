//! 内置工具：参数解析与空结果骨架
//!
//! 真实的服务器进程不在本 crate 内；这些工具返回与服务器响应同形的 JSON，
//! 让编排流程在没有外部服务时也能完整跑通。

use async_trait::async_trait;
use anyhow::Context;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ThinkingDepth;
use crate::core::ResearchState;
use crate::mcp::config::{
    BROWSER_SERVER, REASONING_SERVER, REPORT_SERVER, VECTOR_STORE_SERVER, WEB_SEARCH_SERVER,
};
use crate::mcp::tools::{schema_of, McpTool, ToolRegistry};

/// web_search 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchParams {
    /// 检索语句
    pub query: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    /// basic 或 advanced
    #[serde(default)]
    pub search_depth: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VectorStoreParams {
    /// add / query
    pub operation: String,
    pub collection: String,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BrowserNavigateParams {
    pub url: String,
    /// 需要提取的内容，如 pricing、product list
    #[serde(default)]
    pub extract: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeepReasoningParams {
    pub prompt: String,
    #[serde(default)]
    pub steps: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateReportParams {
    pub title: String,
    /// markdown / html / pdf
    #[serde(default)]
    pub format: Option<String>,
}

fn parse<T: for<'de> Deserialize<'de>>(tool: &str, params: Value) -> anyhow::Result<T> {
    serde_json::from_value(params).with_context(|| format!("invalid parameters for {}", tool))
}

pub struct WebSearchTool;

#[async_trait]
impl McpTool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for market data, news and competitor information"
    }

    fn server(&self) -> &str {
        WEB_SEARCH_SERVER
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WebSearchParams>()
    }

    async fn execute(&self, params: Value, _state: &ResearchState) -> anyhow::Result<Value> {
        let p: WebSearchParams = parse(self.name(), params)?;
        Ok(json!({
            "query": p.query,
            "search_depth": p.search_depth.unwrap_or_else(|| "basic".to_string()),
            "max_results": p.max_results.unwrap_or(5),
            "results": [],
            "total_results": 0
        }))
    }
}

pub struct VectorStoreTool;

#[async_trait]
impl McpTool for VectorStoreTool {
    fn name(&self) -> &str {
        "vector_store"
    }

    fn description(&self) -> &str {
        "Store research documents and run similarity queries over them"
    }

    fn server(&self) -> &str {
        VECTOR_STORE_SERVER
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<VectorStoreParams>()
    }

    async fn execute(&self, params: Value, state: &ResearchState) -> anyhow::Result<Value> {
        let p: VectorStoreParams = parse(self.name(), params)?;
        Ok(json!({
            "operation": p.operation,
            "collection": p.collection,
            "session_id": state.session_id(),
            "stored": p.documents.len(),
            "query": p.query,
            "matches": []
        }))
    }
}

pub struct BrowserNavigateTool;

#[async_trait]
impl McpTool for BrowserNavigateTool {
    fn name(&self) -> &str {
        "browser_navigate"
    }

    fn description(&self) -> &str {
        "Open a page and extract structured content such as pricing or product lists"
    }

    fn server(&self) -> &str {
        BROWSER_SERVER
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<BrowserNavigateParams>()
    }

    async fn execute(&self, params: Value, _state: &ResearchState) -> anyhow::Result<Value> {
        let p: BrowserNavigateParams = parse(self.name(), params)?;
        Ok(json!({
            "url": p.url,
            "extract": p.extract,
            "title": null,
            "content": "",
            "links": []
        }))
    }
}

pub struct DeepReasoningTool {
    default_steps: u32,
}

impl DeepReasoningTool {
    pub fn new(depth: ThinkingDepth) -> Self {
        Self {
            default_steps: depth.reasoning_steps(),
        }
    }
}

#[async_trait]
impl McpTool for DeepReasoningTool {
    fn name(&self) -> &str {
        "deep_reasoning"
    }

    fn description(&self) -> &str {
        "Multi-step reasoning for research planning and synthesis"
    }

    fn server(&self) -> &str {
        REASONING_SERVER
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DeepReasoningParams>()
    }

    async fn execute(&self, params: Value, _state: &ResearchState) -> anyhow::Result<Value> {
        let p: DeepReasoningParams = parse(self.name(), params)?;
        Ok(json!({
            "prompt": p.prompt,
            "steps": p.steps.unwrap_or(self.default_steps),
            "thoughts": [],
            "summary": null
        }))
    }
}

pub struct GenerateReportTool;

#[async_trait]
impl McpTool for GenerateReportTool {
    fn name(&self) -> &str {
        "generate_report"
    }

    fn description(&self) -> &str {
        "Render the research state into a formatted report"
    }

    fn server(&self) -> &str {
        REPORT_SERVER
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<GenerateReportParams>()
    }

    async fn execute(&self, params: Value, state: &ResearchState) -> anyhow::Result<Value> {
        let p: GenerateReportParams = parse(self.name(), params)?;
        Ok(json!({
            "title": p.title,
            "format": p.format.unwrap_or_else(|| "markdown".to_string()),
            "sections": state.report_sections.len(),
            "content": null
        }))
    }
}

/// 注册全部内置工具
pub fn default_registry(depth: ThinkingDepth) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(WebSearchTool);
    registry.register(VectorStoreTool);
    registry.register(BrowserNavigateTool);
    registry.register(DeepReasoningTool::new(depth));
    registry.register(GenerateReportTool);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_all_builtin_tools() {
        let registry = default_registry(ThinkingDepth::Standard);
        assert_eq!(
            registry.tool_names(),
            vec![
                "browser_navigate",
                "deep_reasoning",
                "generate_report",
                "vector_store",
                "web_search"
            ]
        );
    }

    #[test]
    fn test_schema_lists_parameters() {
        let schema = WebSearchTool.parameters_schema();
        assert!(schema["properties"].get("query").is_some());
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "query"));
    }

    #[tokio::test]
    async fn test_web_search_scaffold() {
        let state = ResearchState::new("s1", "coffee", vec![]);
        let out = WebSearchTool
            .execute(json!({ "query": "coffee market size" }), &state)
            .await
            .unwrap();
        assert_eq!(out["total_results"], 0);
        assert!(out["results"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_steps_follow_depth() {
        let state = ResearchState::new("s1", "q", vec![]);
        let out = DeepReasoningTool::new(ThinkingDepth::Shallow)
            .execute(json!({ "prompt": "plan" }), &state)
            .await
            .unwrap();
        assert_eq!(out["steps"], 2);
    }

    #[tokio::test]
    async fn test_missing_parameter_is_an_error() {
        let state = ResearchState::new("s1", "q", vec![]);
        let err = WebSearchTool.execute(json!({}), &state).await.unwrap_err();
        assert!(format!("{:#}", err).contains("invalid parameters for web_search"));
    }
}
