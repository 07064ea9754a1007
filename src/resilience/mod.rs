//! 弹性执行层：错误分类、指数退避、熔断器与降级回退

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod events;
pub mod manager;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use classifier::ErrorClassifier;
pub use events::ResilienceEvent;
pub use manager::{
    Fallback, HealthCheckResult, OperationStats, ResilienceError, ResilienceHealthReport,
    ResilienceManager, ResilienceOptions, TaskOutcome,
};
