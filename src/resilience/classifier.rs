//! 错误分类：按错误链文本（小写）匹配配置中的致命/可重试关键字

use crate::config::ResilienceSection;
use crate::core::ErrorCategory;

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    fatal: Vec<String>,
    retryable: Vec<String>,
}

impl ErrorClassifier {
    pub fn new(fatal: &[String], retryable: &[String]) -> Self {
        Self {
            fatal: fatal.iter().map(|s| s.to_lowercase()).collect(),
            retryable: retryable.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn from_config(cfg: &ResilienceSection) -> Self {
        Self::new(&cfg.fatal_errors, &cfg.retryable_errors)
    }

    /// 致命优先于可重试；都不匹配时为 Degraded
    pub fn classify(&self, err: &anyhow::Error) -> ErrorCategory {
        self.classify_message(&format!("{:#}", err))
    }

    pub fn classify_message(&self, message: &str) -> ErrorCategory {
        let text = message.to_lowercase();
        if self.fatal.iter().any(|p| text.contains(p.as_str())) {
            ErrorCategory::Fatal
        } else if self.retryable.iter().any(|p| text.contains(p.as_str())) {
            ErrorCategory::Retryable
        } else {
            ErrorCategory::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::from_config(&ResilienceSection::default())
    }

    #[test]
    fn test_network_errors_are_retryable() {
        let c = classifier();
        assert_eq!(c.classify(&anyhow::anyhow!("ECONNRESET")), ErrorCategory::Retryable);
        assert_eq!(c.classify_message("HTTP 429 Too Many Requests"), ErrorCategory::Retryable);
        assert_eq!(c.classify_message("request timed out"), ErrorCategory::Retryable);
    }

    #[test]
    fn test_fatal_wins_over_retryable() {
        let c = classifier();
        assert_eq!(
            c.classify_message("Unauthorized: network gateway rejected key"),
            ErrorCategory::Fatal
        );
        assert_eq!(c.classify_message("Invalid API key"), ErrorCategory::Fatal);
    }

    #[test]
    fn test_unknown_is_degraded() {
        assert_eq!(classifier().classify_message("something odd"), ErrorCategory::Degraded);
    }

    #[test]
    fn test_context_chain_is_inspected() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("socket hang up"));
        let err = err.context("web_search failed").unwrap_err();
        assert_eq!(classifier().classify(&err), ErrorCategory::Retryable);
    }
}
