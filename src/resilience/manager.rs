//! ResilienceManager：超时 + 指数退避重试 + 熔断 + 降级回退
//!
//! 所有外部工具调用都经由这里。熔断器与计数器按 operation_id 存放在进程级表中，
//! MCP 调用的 operation_id 形如 `mcp:{server}:{operation}`，同一服务器的健康状况在会话间共享。

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::config::ResilienceSection;
use crate::core::{ErrorCategory, Priority};
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState, Transition};
use crate::resilience::classifier::ErrorClassifier;
use crate::resilience::events::ResilienceEvent;

/// 弹性执行失败
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Circuit breaker open for '{operation_id}', next attempt allowed at {next_attempt_time}")]
    CircuitOpen {
        operation_id: String,
        next_attempt_time: DateTime<Utc>,
    },

    #[error("Operation '{operation_id}' failed with non-retryable error: {last_error}")]
    Fatal {
        operation_id: String,
        last_error: String,
    },

    #[error("Operation '{operation_id}' failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        operation_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Fallback for '{operation_id}' failed: {error} (original error: {original_error})")]
    FallbackFailed {
        operation_id: String,
        error: String,
        original_error: String,
    },
}

/// 回退操作：仅在重试耗尽后调用一次
pub type Fallback<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// 单次调用的覆盖项
pub struct ResilienceOptions<T> {
    timeout: Option<Duration>,
    max_attempts: Option<u32>,
    fallback: Option<Fallback<T>>,
}

impl<T> Default for ResilienceOptions<T> {
    fn default() -> Self {
        Self {
            timeout: None,
            max_attempts: None,
            fallback: None,
        }
    }
}

impl<T: Send + 'static> ResilienceOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.fallback = Some(Box::new(move || Box::pin(fallback())));
        self
    }
}

/// execute_task 的结果：正常完成或降级哨兵
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum TaskOutcome<T> {
    Completed(T),
    Degraded { task_id: String },
}

impl<T> TaskOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, TaskOutcome::Degraded { .. })
    }
}

/// 每个 operation_id 的计数器
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub avg_response_ms: f64,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl OperationStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// 弹性层健康汇总
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceHealthReport {
    pub healthy: bool,
    pub open_circuits: Vec<String>,
    pub circuits: BTreeMap<String, CircuitBreaker>,
    pub operations: BTreeMap<String, OperationStats>,
    pub health_checks: BTreeMap<String, HealthCheckResult>,
}

pub struct ResilienceManager {
    config: ResilienceSection,
    classifier: ErrorClassifier,
    backoff: BackoffPolicy,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    stats: Mutex<HashMap<String, OperationStats>>,
    health: RwLock<HashMap<String, HealthCheckResult>>,
    events: broadcast::Sender<ResilienceEvent>,
}

impl ResilienceManager {
    pub fn new(config: ResilienceSection) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            classifier: ErrorClassifier::from_config(&config),
            backoff: BackoffPolicy::from_config(&config),
            config,
            breakers: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &ResilienceSection {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ResilienceEvent) {
        tracing::debug!(event = event.name(), "resilience event");
        let _ = self.events.send(event);
    }

    /// 在超时、重试、熔断保护下执行 operation；重试耗尽后若提供 fallback 且允许回退，则调用一次 fallback
    pub async fn execute_with_resilience<T, F, Fut>(
        &self,
        operation_id: &str,
        mut operation: F,
        options: ResilienceOptions<T>,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.config.default_timeout_ms));
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.max_retry_attempts)
            .max(1);

        if let Err(next_attempt_time) = self.acquire(operation_id).await {
            tracing::debug!(operation_id, %next_attempt_time, "rejected by open circuit");
            return Err(ResilienceError::CircuitOpen {
                operation_id: operation_id.to_string(),
                next_attempt_time,
            });
        }

        let mut attempts = 0;
        let mut last_error: Option<String> = None;
        let mut fatal = false;

        for attempt in 1..=max_attempts {
            if attempt > 1 && self.acquire(operation_id).await.is_err() {
                tracing::warn!(operation_id, attempt, "circuit opened during retries, giving up");
                break;
            }
            attempts = attempt;

            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "Operation '{}' timed out after {}ms",
                    operation_id,
                    timeout.as_millis()
                )),
            };
            let elapsed = started.elapsed();

            match outcome {
                Ok(value) => {
                    self.on_success(operation_id, attempt, elapsed).await;
                    return Ok(value);
                }
                Err(err) => {
                    let category = self.classifier.classify(&err);
                    let message = format!("{:#}", err);
                    tracing::warn!(
                        operation_id,
                        attempt,
                        max_attempts,
                        category = category.as_str(),
                        error = %message,
                        "operation attempt failed"
                    );
                    self.on_failure(operation_id, attempt, category, &message).await;
                    last_error = Some(message);

                    if !category.should_retry() {
                        fatal = true;
                        break;
                    }
                    if attempt < max_attempts {
                        tokio::time::sleep(self.backoff.delay(attempt)).await;
                    }
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| "unknown error".to_string());

        if let Some(fallback) = options.fallback {
            if self.config.enable_fallback_mode {
                tracing::warn!(operation_id, error = %last_error, "invoking fallback operation");
                self.emit(ResilienceEvent::OperationFallback {
                    operation_id: operation_id.to_string(),
                    error: last_error.clone(),
                });
                self.stats
                    .lock()
                    .await
                    .entry(operation_id.to_string())
                    .or_default()
                    .fallbacks += 1;
                return fallback()
                    .await
                    .map_err(|e| ResilienceError::FallbackFailed {
                        operation_id: operation_id.to_string(),
                        error: format!("{:#}", e),
                        original_error: last_error,
                    });
            }
        }

        if fatal {
            Err(ResilienceError::Fatal {
                operation_id: operation_id.to_string(),
                last_error,
            })
        } else {
            Err(ResilienceError::Exhausted {
                operation_id: operation_id.to_string(),
                attempts,
                last_error,
            })
        }
    }

    /// MCP 工具调用：服务器级 operation_id、MCP 超时、可选静态回退载荷
    pub async fn execute_mcp_operation<F, Fut>(
        &self,
        server: &str,
        operation: &str,
        op: F,
        fallback_payload: Option<Value>,
    ) -> Result<Value, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let operation_id = format!("mcp:{}:{}", server, operation);
        let mut options =
            ResilienceOptions::new().timeout(Duration::from_millis(self.config.mcp_timeout_ms));
        if let Some(payload) = fallback_payload {
            options = options.with_fallback(move || async move { Ok(payload) });
        }
        self.execute_with_resilience(&operation_id, op, options).await
    }

    /// 任务执行：超时按优先级缩放；degrade 为 true 时重试耗尽返回 Degraded 哨兵
    pub async fn execute_task<T, F, Fut>(
        &self,
        task_id: &str,
        priority: Priority,
        mut op: F,
        degrade: bool,
    ) -> Result<TaskOutcome<T>, ResilienceError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let timeout_ms = self.config.task_timeout_ms as f64 * priority.timeout_multiplier();
        let mut options =
            ResilienceOptions::new().timeout(Duration::from_millis(timeout_ms as u64));
        if degrade {
            let task_id = task_id.to_string();
            options = options.with_fallback(move || async move {
                Ok(TaskOutcome::Degraded { task_id })
            });
        }
        let operation_id = format!("task:{}", task_id);
        self.execute_with_resilience(
            &operation_id,
            move || {
                let fut = op();
                async move { fut.await.map(TaskOutcome::Completed) }
            },
            options,
        )
        .await
    }

    /// 在健康检查超时内运行 check，记录结果；失败时发出 health:degraded
    pub async fn perform_health_check<F, Fut>(&self, component: &str, check: F) -> HealthCheckResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let timeout = Duration::from_millis(self.config.health_check_timeout_ms);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, check()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!(
                "Health check timed out after {}ms",
                timeout.as_millis()
            )),
        };

        let result = HealthCheckResult {
            component: component.to_string(),
            healthy: outcome.is_ok(),
            response_time_ms: started.elapsed().as_millis() as u64,
            error: outcome.err(),
            checked_at: Utc::now(),
        };

        if let Some(error) = &result.error {
            tracing::warn!(component, error = %error, "health check failed");
            self.emit(ResilienceEvent::HealthDegraded {
                component: component.to_string(),
                error: error.clone(),
            });
        }

        self.health
            .write()
            .await
            .insert(component.to_string(), result.clone());
        result
    }

    pub async fn circuit_state(&self, operation_id: &str) -> Option<CircuitBreaker> {
        self.breakers.lock().await.get(operation_id).cloned()
    }

    pub async fn operation_stats(&self, operation_id: &str) -> Option<OperationStats> {
        self.stats.lock().await.get(operation_id).cloned()
    }

    /// 强制关闭某个熔断器（运维手动恢复）
    pub async fn reset_circuit(&self, operation_id: &str) -> bool {
        let removed = self.breakers.lock().await.remove(operation_id).is_some();
        if removed {
            tracing::info!(operation_id, "circuit breaker reset");
            self.emit(ResilienceEvent::CircuitClosed {
                operation_id: operation_id.to_string(),
            });
        }
        removed
    }

    pub async fn health_report(&self) -> ResilienceHealthReport {
        let circuits: BTreeMap<String, CircuitBreaker> = self
            .breakers
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let operations: BTreeMap<String, OperationStats> = self
            .stats
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let health_checks: BTreeMap<String, HealthCheckResult> = self
            .health
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let open_circuits: Vec<String> = circuits
            .iter()
            .filter(|(_, cb)| cb.state != CircuitState::Closed)
            .map(|(k, _)| k.clone())
            .collect();
        let healthy = open_circuits.is_empty() && health_checks.values().all(|h| h.healthy);

        ResilienceHealthReport {
            healthy,
            open_circuits,
            circuits,
            operations,
            health_checks,
        }
    }

    async fn acquire(&self, operation_id: &str) -> Result<(), DateTime<Utc>> {
        let trial_window =
            ChronoDuration::milliseconds(self.config.circuit_breaker_timeout_ms as i64);
        let entered_half_open = {
            let mut breakers = self.breakers.lock().await;
            match breakers.get_mut(operation_id) {
                None => false,
                Some(cb) => cb.try_acquire(Utc::now(), trial_window)?,
            }
        };
        if entered_half_open {
            tracing::info!(operation_id, "circuit half-open, admitting trial request");
            self.emit(ResilienceEvent::CircuitHalfOpen {
                operation_id: operation_id.to_string(),
            });
        }
        Ok(())
    }

    async fn on_success(&self, operation_id: &str, attempt: u32, elapsed: Duration) {
        let closed = {
            let mut breakers = self.breakers.lock().await;
            breakers
                .get_mut(operation_id)
                .map(|cb| cb.record_success() == Transition::Closed)
                .unwrap_or(false)
        };

        {
            let mut stats = self.stats.lock().await;
            let entry = stats.entry(operation_id.to_string()).or_default();
            entry.attempts += 1;
            entry.successes += 1;
            let ms = elapsed.as_millis() as f64;
            entry.avg_response_ms += (ms - entry.avg_response_ms) / entry.successes as f64;
            entry.last_success_at = Some(Utc::now());
        }

        self.emit(ResilienceEvent::OperationSuccess {
            operation_id: operation_id.to_string(),
            attempt,
            duration_ms: elapsed.as_millis() as u64,
        });
        if closed {
            tracing::info!(operation_id, "circuit breaker closed after successful trial");
            self.emit(ResilienceEvent::CircuitClosed {
                operation_id: operation_id.to_string(),
            });
        }
    }

    async fn on_failure(
        &self,
        operation_id: &str,
        attempt: u32,
        category: ErrorCategory,
        message: &str,
    ) {
        let now = Utc::now();
        let open_for = ChronoDuration::milliseconds(self.config.circuit_breaker_timeout_ms as i64);
        let opened = {
            let mut breakers = self.breakers.lock().await;
            let cb = breakers.entry(operation_id.to_string()).or_default();
            match cb.record_failure(now, self.config.circuit_breaker_threshold, open_for) {
                Transition::Opened => Some((cb.failure_count, cb.next_attempt_time.unwrap_or(now))),
                _ => None,
            }
        };

        {
            let mut stats = self.stats.lock().await;
            let entry = stats.entry(operation_id.to_string()).or_default();
            entry.attempts += 1;
            entry.failures += 1;
            entry.last_error = Some(message.to_string());
            entry.last_failure_at = Some(now);
        }

        self.emit(ResilienceEvent::OperationError {
            operation_id: operation_id.to_string(),
            attempt,
            category,
            error: message.to_string(),
        });

        if let Some((failure_count, next_attempt_time)) = opened {
            tracing::warn!(
                operation_id,
                failure_count,
                %next_attempt_time,
                "circuit breaker opened"
            );
            self.emit(ResilienceEvent::CircuitOpened {
                operation_id: operation_id.to_string(),
                failure_count,
                next_attempt_time,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config() -> ResilienceSection {
        ResilienceSection {
            base_retry_delay_ms: 1,
            max_retry_delay_ms: 5,
            ..ResilienceSection::default()
        }
    }

    #[tokio::test]
    async fn test_circuit_opens_and_rejects_without_invoking() {
        let manager = ResilienceManager::new(ResilienceSection {
            circuit_breaker_threshold: 3,
            ..fast_config()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result: Result<(), _> = manager
                .execute_with_resilience(
                    "op",
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err(anyhow::anyhow!("ECONNRESET")) }
                    },
                    ResilienceOptions::new().max_attempts(1),
                )
                .await;
            assert!(result.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(manager.circuit_state("op").await.unwrap().is_open());

        let calls_after = calls.clone();
        let result: Result<(), _> = manager
            .execute_with_resilience(
                "op",
                move || {
                    calls_after.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                ResilienceOptions::new(),
            )
            .await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("next attempt allowed at"));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let manager = ResilienceManager::new(fast_config());
        for _ in 0..2 {
            let _: Result<(), _> = manager
                .execute_with_resilience(
                    "op",
                    || async { Err(anyhow::anyhow!("network down")) },
                    ResilienceOptions::new().max_attempts(1),
                )
                .await;
        }
        assert_eq!(manager.circuit_state("op").await.unwrap().failure_count, 2);

        let value = manager
            .execute_with_resilience("op", || async { Ok(7) }, ResilienceOptions::new())
            .await
            .unwrap();
        assert_eq!(value, 7);
        let cb = manager.circuit_state("op").await.unwrap();
        assert_eq!(cb.state, CircuitState::Closed);
        assert_eq!(cb.failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_circuit() {
        let manager = ResilienceManager::new(ResilienceSection {
            circuit_breaker_threshold: 1,
            circuit_breaker_timeout_ms: 30,
            ..fast_config()
        });
        let _: Result<(), _> = manager
            .execute_with_resilience(
                "op",
                || async { Err(anyhow::anyhow!("503 unavailable")) },
                ResilienceOptions::new().max_attempts(1),
            )
            .await;
        let rejected: Result<(), _> = manager
            .execute_with_resilience("op", || async { Ok(()) }, ResilienceOptions::new())
            .await;
        assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));

        tokio::time::sleep(Duration::from_millis(60)).await;
        manager
            .execute_with_resilience("op", || async { Ok(()) }, ResilienceOptions::new())
            .await
            .unwrap();
        assert_eq!(
            manager.circuit_state("op").await.unwrap().state,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_dropped_trial_does_not_wedge_circuit() {
        let manager = ResilienceManager::new(ResilienceSection {
            circuit_breaker_threshold: 1,
            circuit_breaker_timeout_ms: 30,
            ..fast_config()
        });
        let _: Result<(), _> = manager
            .execute_with_resilience(
                "op",
                || async { Err(anyhow::anyhow!("503 unavailable")) },
                ResilienceOptions::new().max_attempts(1),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 半开试探进行中被调用方取消
        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            manager.execute_with_resilience(
                "op",
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<(), anyhow::Error>(())
                },
                ResilienceOptions::new(),
            ),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(
            manager.circuit_state("op").await.unwrap().state,
            CircuitState::HalfOpen
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        manager
            .execute_with_resilience("op", || async { Ok(()) }, ResilienceOptions::new())
            .await
            .unwrap();
        assert_eq!(
            manager.circuit_state("op").await.unwrap().state,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_mcp_operation_retries_exactly_max_attempts() {
        let manager = ResilienceManager::new(ResilienceSection {
            max_retry_attempts: 3,
            ..fast_config()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = manager
            .execute_mcp_operation(
                "web_search",
                "search",
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(anyhow::anyhow!("ECONNRESET")) }
                },
                None,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert!(matches!(err, ResilienceError::Exhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("ECONNRESET"));
    }

    #[tokio::test]
    async fn test_fallback_runs_once_after_retries() {
        let manager = ResilienceManager::new(fast_config());
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let op_log = log.clone();
        let fb_log = log.clone();

        let value = manager
            .execute_with_resilience(
                "with-fallback",
                move || {
                    op_log.lock().unwrap().push("op");
                    async { Err(anyhow::anyhow!("rate limit exceeded")) }
                },
                ResilienceOptions::new().with_fallback(move || async move {
                    fb_log.lock().unwrap().push("fallback");
                    Ok("cached")
                }),
            )
            .await
            .unwrap();

        assert_eq!(value, "cached");
        assert_eq!(*log.lock().unwrap(), vec!["op", "op", "op", "fallback"]);
        assert_eq!(
            manager.operation_stats("with-fallback").await.unwrap().fallbacks,
            1
        );
    }

    #[tokio::test]
    async fn test_fallback_not_used_on_success() {
        let manager = ResilienceManager::new(fast_config());
        let used = Arc::new(AtomicUsize::new(0));
        let flag = used.clone();
        let value = manager
            .execute_with_resilience(
                "ok",
                || async { Ok(1) },
                ResilienceOptions::new().with_fallback(move || async move {
                    flag.fetch_add(1, Ordering::SeqCst);
                    Ok(2)
                }),
            )
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(used.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_disabled_by_config() {
        let manager = ResilienceManager::new(ResilienceSection {
            enable_fallback_mode: false,
            ..fast_config()
        });
        let result = manager
            .execute_with_resilience(
                "no-fallback",
                || async { Err::<u8, _>(anyhow::anyhow!("ETIMEDOUT")) },
                ResilienceOptions::new().with_fallback(|| async { Ok(0u8) }),
            )
            .await;
        assert!(matches!(result, Err(ResilienceError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let manager = ResilienceManager::new(fast_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = manager
            .execute_with_resilience(
                "auth",
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(anyhow::anyhow!("Invalid API key")) }
                },
                ResilienceOptions::new(),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ResilienceError::Fatal { .. })));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable_failure() {
        let manager = ResilienceManager::new(fast_config());
        let result: Result<(), _> = manager
            .execute_with_resilience(
                "slow",
                || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                },
                ResilienceOptions::new()
                    .timeout(Duration::from_millis(10))
                    .max_attempts(2),
            )
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, ResilienceError::Exhausted { attempts: 2, .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_task_timeout_scales_with_priority() {
        let manager = ResilienceManager::new(ResilienceSection {
            task_timeout_ms: 100,
            max_retry_attempts: 1,
            ..fast_config()
        });
        let slow = || async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok("done")
        };

        let low = manager.execute_task("t-low", Priority::Low, slow, false).await;
        assert!(low.is_err());

        let critical = manager
            .execute_task("t-critical", Priority::Critical, slow, false)
            .await
            .unwrap();
        assert_eq!(critical, TaskOutcome::Completed("done"));
    }

    #[tokio::test]
    async fn test_task_degrades_when_requested() {
        let manager = ResilienceManager::new(fast_config());
        let outcome = manager
            .execute_task(
                "t1",
                Priority::Medium,
                || async { Err::<String, _>(anyhow::anyhow!("network error")) },
                true,
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TaskOutcome::Degraded {
                task_id: "t1".to_string()
            }
        );
        assert!(outcome.is_degraded());
    }

    #[tokio::test]
    async fn test_health_check_records_and_emits() {
        let manager = ResilienceManager::new(fast_config());
        let mut events = manager.subscribe();

        let ok = manager.perform_health_check("mcp", || async { Ok(()) }).await;
        assert!(ok.healthy);

        let bad = manager
            .perform_health_check("vector_store", || async {
                Err(anyhow::anyhow!("connection refused"))
            })
            .await;
        assert!(!bad.healthy);
        assert_eq!(bad.error.as_deref(), Some("connection refused"));

        let event = events.recv().await.unwrap();
        assert_eq!(event.name(), "health:degraded");

        let report = manager.health_report().await;
        assert!(!report.healthy);
        assert_eq!(report.health_checks.len(), 2);
    }

    #[tokio::test]
    async fn test_events_for_opening_circuit() {
        let manager = ResilienceManager::new(ResilienceSection {
            circuit_breaker_threshold: 1,
            ..fast_config()
        });
        let mut events = manager.subscribe();
        let _: Result<(), _> = manager
            .execute_with_resilience(
                "flaky",
                || async { Err(anyhow::anyhow!("ECONNREFUSED")) },
                ResilienceOptions::new().max_attempts(1),
            )
            .await;

        assert_eq!(events.recv().await.unwrap().name(), "operation:error");
        assert_eq!(events.recv().await.unwrap().name(), "circuit:opened");

        let report = manager.health_report().await;
        assert_eq!(report.open_circuits, vec!["flaky".to_string()]);
        assert!(manager.reset_circuit("flaky").await);
        assert!(manager.circuit_state("flaky").await.is_none());
    }
}
