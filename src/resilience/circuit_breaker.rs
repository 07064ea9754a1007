//! 熔断器：连续失败达到阈值后打开，冷却结束后放行一次半开试探
//!
//! Closed --(failures >= threshold)--> Open --(now >= next_attempt_time)--> HalfOpen
//! HalfOpen --success--> Closed；HalfOpen --failure--> Open
//!
//! 半开试探超过一个冷却期仍未上报结果（调用方 future 被丢弃）视为放弃，下一次调用接替试探。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// 某个 operation_id 的熔断记录（首次失败时惰性创建）
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    /// 半开状态下在途试探的开始时间
    #[serde(skip)]
    trial_started_at: Option<DateTime<Utc>>,
}

/// record_failure / record_success 导致的状态跃迁
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Opened,
    Closed,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
            trial_started_at: None,
        }
    }

    /// 是否允许本次调用；拒绝时返回下一次允许尝试的时间。
    /// 第二个返回值表示是否刚刚进入半开状态。trial_window 之后仍未结束的试探视为已放弃。
    pub fn try_acquire(
        &mut self,
        now: DateTime<Utc>,
        trial_window: ChronoDuration,
    ) -> Result<bool, DateTime<Utc>> {
        match self.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let next = self.next_attempt_time.unwrap_or(now);
                if now >= next {
                    self.state = CircuitState::HalfOpen;
                    self.trial_started_at = Some(now);
                    Ok(true)
                } else {
                    Err(next)
                }
            }
            CircuitState::HalfOpen => match self.trial_started_at {
                Some(started) if now < started + trial_window => Err(started + trial_window),
                _ => {
                    self.trial_started_at = Some(now);
                    Ok(false)
                }
            },
        }
    }

    pub fn record_success(&mut self) -> Transition {
        let was_closed = self.state == CircuitState::Closed;
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.next_attempt_time = None;
        self.trial_started_at = None;
        if was_closed {
            Transition::None
        } else {
            Transition::Closed
        }
    }

    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        threshold: u32,
        open_for: ChronoDuration,
    ) -> Transition {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);
        let should_open = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.failure_count >= threshold.max(1),
            CircuitState::Open => false,
        };
        self.trial_started_at = None;
        if should_open {
            self.state = CircuitState::Open;
            self.next_attempt_time = Some(now + open_for);
            Transition::Opened
        } else {
            Transition::None
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
