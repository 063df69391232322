//! Security-token acquisition: poll the page's embedded CSRF token until it
//! appears or the deadline passes.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::transport::PageHost;
use crate::AgentError;

const TOKEN_EXPR: &str =
    r#"document.querySelector('meta[name="csrf-token"]')?.content ?? null"#;

/// Polls every `poll_interval` up to `timeout`. Returns
/// [`AgentError::TokenNotFound`] if the token never appears; the caller fails
/// the whole run on that.
pub async fn wait_for_token(
    host: &dyn PageHost,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<String, AgentError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(token) = read_token(host).await? {
            debug!("security token acquired");
            return Ok(token);
        }
        if Instant::now() >= deadline {
            return Err(AgentError::TokenNotFound);
        }
        sleep(poll_interval).await;
    }
}

async fn read_token(host: &dyn PageHost) -> Result<Option<String>, AgentError> {
    let value = host.eval(TOKEN_EXPR).await?;
    Ok(match value {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Yields `null` for the first `misses` polls, then the token.
    struct EventualToken {
        misses: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageHost for EventualToken {
        async fn eval(&self, _expression: &str) -> Result<Value, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.misses {
                Ok(Value::Null)
            } else {
                Ok(Value::from("tok-123"))
            }
        }
    }

    #[tokio::test]
    async fn returns_token_once_present() {
        let host = EventualToken {
            misses: 3,
            calls: AtomicUsize::new(0),
        };
        let token = wait_for_token(&host, Duration::from_secs(1), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(token, "tok-123");
    }

    #[tokio::test]
    async fn times_out_when_absent() {
        let host = EventualToken {
            misses: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let err = wait_for_token(&host, Duration::from_millis(20), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TokenNotFound));
    }

    #[tokio::test]
    async fn empty_token_counts_as_absent() {
        struct EmptyToken;
        #[async_trait]
        impl PageHost for EmptyToken {
            async fn eval(&self, _expression: &str) -> Result<Value, AgentError> {
                Ok(Value::from(""))
            }
        }
        let err = wait_for_token(&EmptyToken, Duration::from_millis(10), Duration::from_millis(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TokenNotFound));
    }
}
