//! 会话状态事件流
//!
//! 每个会话一个 broadcast 通道；订阅方（CLI 进度输出、前端桥接）按需订阅，
//! 没有订阅者时 broadcast 直接丢弃事件。

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// 每个会话通道的缓冲大小
const CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEventType {
    AgentStatus,
    TaskProgress,
    AnalysisResult,
    Error,
    Completion,
}

/// 推送给订阅方的状态事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub event_type: StatusEventType,
    pub agent_id: String,
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// RFC 3339
    pub timestamp: String,
}

impl StatusEvent {
    pub fn new(
        event_type: StatusEventType,
        agent_id: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            agent_id: agent_id.into(),
            status: status.into(),
            message: message.into(),
            data: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Default)]
pub struct StreamManager {
    channels: RwLock<HashMap<String, broadcast::Sender<StatusEvent>>>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅会话事件；通道不存在时创建
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<StatusEvent> {
        let mut channels = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// 尽力广播，返回收到事件的订阅者数量
    pub fn broadcast(&self, session_id: &str, event: StatusEvent) -> usize {
        let channels = match self.channels.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match channels.get(session_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// 会话结束时关闭通道，订阅方随后收到 Closed
    pub fn close(&self, session_id: &str) {
        let mut channels = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        match self.channels.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_only_their_session() {
        let streams = StreamManager::new();
        let mut a = streams.subscribe("a");
        let mut b = streams.subscribe("b");

        let delivered = streams.broadcast(
            "a",
            StatusEvent::new(
                StatusEventType::TaskProgress,
                "execute",
                "running",
                "2/6 tasks complete",
            )
            .with_data(serde_json::json!({ "completed": 2, "total": 6 })),
        );
        assert_eq!(delivered, 1);

        let event = a.recv().await.unwrap();
        assert_eq!(event.event_type, StatusEventType::TaskProgress);
        assert_eq!(event.data.unwrap()["total"], 6);
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_subscribers_is_dropped() {
        let streams = StreamManager::new();
        let event = StatusEvent::new(StatusEventType::Error, "x", "failed", "boom");
        assert_eq!(streams.broadcast("nobody", event), 0);
    }

    #[test]
    fn test_wire_format() {
        let event = StatusEvent::new(StatusEventType::AgentStatus, "MarketTrendAgent", "busy", "");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "agent_status");
        assert!(json.get("data").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_subscription() {
        let streams = StreamManager::new();
        let mut rx = streams.subscribe("s");
        streams.close("s");
        assert_eq!(streams.session_count(), 0);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
