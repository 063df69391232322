//! On-page status overlay: a fixed element injected into the host page so the
//! operator can watch run progress where the work actually happens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::agent::StatusSink;
use crate::transport::PageHost;

const OVERLAY_ID: &str = "reportscope-overlay";
const STATUS_ID: &str = "reportscope-overlay-status";

/// Status sink that mirrors progress into the host page. Injection is
/// ensure-once by element id; repeated updates only touch the text node.
pub struct OverlayStatusSink<H> {
    host: Arc<H>,
}

impl<H: PageHost> OverlayStatusSink<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }

    fn ensure_script() -> String {
        format!(
            r#"(() => {{
  if (document.getElementById("{OVERLAY_ID}")) return;
  const el = document.createElement("div");
  el.id = "{OVERLAY_ID}";
  el.style.cssText = "position:fixed;top:16px;right:16px;z-index:2147483647;" +
    "background:#111;color:#eee;padding:12px 16px;border-radius:8px;" +
    "font:13px sans-serif;box-shadow:0 2px 8px rgba(0,0,0,.4)";
  el.innerHTML = '<strong>Scraping reports…</strong><p id="{STATUS_ID}">Starting…</p>';
  document.documentElement.append(el);
}})()"#
        )
    }

    fn update_script(text: &str) -> String {
        let text_lit = Value::from(text).to_string();
        format!(
            r#"(() => {{
  const p = document.getElementById("{STATUS_ID}");
  if (p) p.textContent = {text_lit};
}})()"#
        )
    }

    /// Removes the overlay after a short grace period so the final status
    /// stays readable.
    pub async fn dismiss_after(&self, delay: Duration) {
        sleep(delay).await;
        let script = format!(
            r#"(() => {{
  const o = document.getElementById("{OVERLAY_ID}");
  if (o) o.remove();
}})()"#
        );
        if let Err(err) = self.host.eval(&script).await {
            warn!(%err, "failed to remove status overlay");
        }
    }
}

#[async_trait]
impl<H: PageHost> StatusSink for OverlayStatusSink<H> {
    async fn update(&self, text: &str) {
        if let Err(err) = self.host.eval(&Self::ensure_script()).await {
            warn!(%err, "failed to inject status overlay");
            return;
        }
        if let Err(err) = self.host.eval(&Self::update_script(text)).await {
            warn!(%err, "failed to update status overlay");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        scripts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageHost for RecordingHost {
        async fn eval(&self, expression: &str) -> Result<Value, AgentError> {
            self.scripts.lock().unwrap().push(expression.to_string());
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn update_injects_then_sets_text() {
        let host = Arc::new(RecordingHost::default());
        let sink = OverlayStatusSink::new(host.clone());
        sink.update("Processed 5 / 10…").await;

        let scripts = host.scripts.lock().unwrap();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].contains(OVERLAY_ID));
        assert!(scripts[1].contains("Processed 5 / 10"));
    }
}
