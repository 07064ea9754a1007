//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCOUT__*` 覆盖（双下划线表示嵌套，如 `SCOUT__RESEARCH__MAX_CONCURRENT_TASKS=5`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::mcp::McpServerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub research: ResearchSection,
    #[serde(default)]
    pub resilience: ResilienceSection,
    #[serde(default)]
    pub performance: PerformanceSection,
    #[serde(default)]
    pub mcp: McpSection,
}

/// [app] 段：应用名与报告输出目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// CLI 导出虚拟文件的目录，未设置时只打印报告
    pub output_dir: Option<PathBuf>,
}

/// 思考深度：影响 deep_reasoning 工具的推理步数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingDepth {
    Shallow,
    Standard,
    Deep,
}

impl ThinkingDepth {
    pub fn reasoning_steps(self) -> u32 {
        match self {
            ThinkingDepth::Shallow => 2,
            ThinkingDepth::Standard => 5,
            ThinkingDepth::Deep => 10,
        }
    }
}

impl Default for ThinkingDepth {
    fn default() -> Self {
        Self::Deep
    }
}

/// [research] 段：编排器的并发、阈值与功能开关
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchSection {
    /// execute 节点单轮最多并发执行的任务数
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub thinking_depth: ThinkingDepth,
    /// 置信度低于该值时要求专家复核
    #[serde(default = "default_validation_threshold")]
    pub validation_threshold: f64,
    #[serde(default = "default_true")]
    pub enable_deep_thinking: bool,
    #[serde(default = "default_true")]
    pub enable_validation: bool,
    #[serde(default = "default_true")]
    pub enable_report_generation: bool,
    #[serde(default = "default_true")]
    pub enable_streaming: bool,
    #[serde(default = "default_true")]
    pub enable_performance_monitoring: bool,
    /// 额外驱动 WorkflowEngine 的阶段追踪
    #[serde(default)]
    pub enable_workflow_tracking: bool,
    /// 图执行的最大步数，防止死循环
    #[serde(default = "default_max_graph_steps")]
    pub max_graph_steps: usize,
    /// delegate/execute 循环的最大轮数，超过后直接进入综合
    #[serde(default = "default_max_execution_rounds")]
    pub max_execution_rounds: u32,
    /// 校验不足时重新排队任务的最大次数
    #[serde(default = "default_max_validation_retries")]
    pub max_validation_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_tasks() -> usize {
    3
}

fn default_validation_threshold() -> f64 {
    0.7
}

fn default_max_graph_steps() -> usize {
    50
}

fn default_max_execution_rounds() -> u32 {
    5
}

fn default_max_validation_retries() -> u32 {
    1
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            thinking_depth: ThinkingDepth::default(),
            validation_threshold: default_validation_threshold(),
            enable_deep_thinking: true,
            enable_validation: true,
            enable_report_generation: true,
            enable_streaming: true,
            enable_performance_monitoring: true,
            enable_workflow_tracking: false,
            max_graph_steps: default_max_graph_steps(),
            max_execution_rounds: default_max_execution_rounds(),
            max_validation_retries: default_max_validation_retries(),
        }
    }
}

/// [resilience] 段：重试、熔断、各类超时与错误分类
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceSection {
    /// 总尝试次数（含首次）
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_ms")]
    pub circuit_breaker_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_mcp_timeout_ms")]
    pub mcp_timeout_ms: u64,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enable_fallback_mode: bool,
    /// 命中即不重试（配置、鉴权、语法类错误）
    #[serde(default = "default_fatal_errors")]
    pub fatal_errors: Vec<String>,
    /// 命中即按退避重试（网络、超时、限流）
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_timeout_ms() -> u64 {
    60_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_mcp_timeout_ms() -> u64 {
    45_000
}

fn default_task_timeout_ms() -> u64 {
    120_000
}

fn default_health_check_timeout_ms() -> u64 {
    5_000
}

fn default_fatal_errors() -> Vec<String> {
    vec![
        "configuration".into(),
        "invalid api key".into(),
        "unauthorized".into(),
        "authentication".into(),
        "forbidden".into(),
        "syntax".into(),
    ]
}

fn default_retryable_errors() -> Vec<String> {
    vec![
        "econnreset".into(),
        "econnrefused".into(),
        "etimedout".into(),
        "enotfound".into(),
        "network".into(),
        "timeout".into(),
        "timed out".into(),
        "rate limit".into(),
        "429".into(),
        "503".into(),
        "socket hang up".into(),
    ]
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_timeout_ms: default_circuit_breaker_timeout_ms(),
            default_timeout_ms: default_timeout_ms(),
            mcp_timeout_ms: default_mcp_timeout_ms(),
            task_timeout_ms: default_task_timeout_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            enable_fallback_mode: true,
            fatal_errors: default_fatal_errors(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

/// [performance] 段：采集间隔、保留策略与资源阈值
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceSection {
    #[serde(default = "default_collection_interval_ms")]
    pub collection_interval_ms: u64,
    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: u32,
    #[serde(default = "default_alert_retention_days")]
    pub alert_retention_days: u32,
    /// 每个会话最多保留的快照数（环形缓冲）
    #[serde(default = "default_max_snapshots_per_session")]
    pub max_snapshots_per_session: usize,
    #[serde(default)]
    pub thresholds: PerformanceThresholds,
}

fn default_collection_interval_ms() -> u64 {
    5_000
}

fn default_metrics_retention_days() -> u32 {
    7
}

fn default_alert_retention_days() -> u32 {
    30
}

fn default_max_snapshots_per_session() -> usize {
    1_000
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            collection_interval_ms: default_collection_interval_ms(),
            metrics_retention_days: default_metrics_retention_days(),
            alert_retention_days: default_alert_retention_days(),
            max_snapshots_per_session: default_max_snapshots_per_session(),
            thresholds: PerformanceThresholds::default(),
        }
    }
}

/// [performance.thresholds] 段：告警与优化建议使用的上限
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceThresholds {
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: f64,
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,
    #[serde(default = "default_max_response_time_ms")]
    pub max_response_time_ms: f64,
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
}

fn default_max_memory_mb() -> f64 {
    1024.0
}

fn default_max_cpu_percent() -> f64 {
    80.0
}

fn default_max_response_time_ms() -> f64 {
    10_000.0
}

fn default_min_success_rate() -> f64 {
    0.9
}

fn default_max_error_rate() -> f64 {
    0.1
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
            max_response_time_ms: default_max_response_time_ms(),
            min_success_rate: default_min_success_rate(),
            max_error_rate: default_max_error_rate(),
        }
    }
}

/// [mcp] 段：覆盖或追加工具服务器配置（键为服务器名）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct McpSection {
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// 从 config 目录加载配置，环境变量 SCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 则追加该文件（可覆盖前面的键），文件不存在时返回错误
/// 3. 最后叠加环境变量 SCOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCOUT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
