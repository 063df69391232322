//! Page seam and GraphQL transport.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::AgentError;

/// Script-evaluation handle on the host page. The returned value is the
/// expression's JSON result; promises are awaited by the implementation.
#[async_trait]
pub trait PageHost: Send + Sync {
    async fn eval(&self, expression: &str) -> Result<Value, AgentError>;
}

#[async_trait]
impl<T: PageHost + ?Sized> PageHost for std::sync::Arc<T> {
    async fn eval(&self, expression: &str) -> Result<Value, AgentError> {
        (**self).eval(expression).await
    }
}

/// One substituted query body, posted with the page's credentials.
#[async_trait]
pub trait GraphQlTransport: Send + Sync {
    /// Posts `body` to the site's GraphQL endpoint. Fails on non-success
    /// transport status or a top-level `errors` list in the response body.
    async fn post(&self, body: &str, token: &str) -> Result<Value, AgentError>;
}

/// Transport that executes `fetch` inside the host page, so requests carry
/// the page's session cookies and origin.
pub struct PageFetchTransport<H> {
    host: H,
    endpoint: String,
}

impl<H: PageHost> PageFetchTransport<H> {
    pub fn new(host: H, endpoint: impl Into<String>) -> Self {
        Self {
            host,
            endpoint: endpoint.into(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn fetch_script(&self, body: &str, token: &str) -> String {
        // JSON string literals double as JS string literals, which keeps the
        // body and token safely escaped.
        let body_lit = Value::from(body).to_string();
        let token_lit = Value::from(token).to_string();
        let endpoint_lit = Value::from(self.endpoint.as_str()).to_string();
        format!(
            r#"(async () => {{
  const res = await fetch({endpoint_lit}, {{
    method: "POST",
    credentials: "include",
    headers: {{
      "Content-Type": "application/json",
      "X-Csrf-Token": {token_lit},
      "Accept": "application/json"
    }},
    body: {body_lit}
  }});
  let body = null;
  try {{ body = await res.json(); }} catch (_) {{}}
  return {{ ok: res.ok, status: res.status, body }};
}})()"#
        )
    }
}

#[async_trait]
impl<H: PageHost> GraphQlTransport for PageFetchTransport<H> {
    async fn post(&self, body: &str, token: &str) -> Result<Value, AgentError> {
        let reply = self.host.eval(&self.fetch_script(body, token)).await?;
        let ok = reply.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let status = reply.get("status").and_then(Value::as_i64).unwrap_or(0);
        let json = reply.get("body").cloned().unwrap_or(Value::Null);

        if !ok {
            return Err(AgentError::Query(format!("graphql status {status}")));
        }
        // Any `errors` key at all marks the response failed, even an empty
        // list.
        if let Some(errors) = json.get("errors") {
            let first = errors
                .as_array()
                .and_then(|list| list.first())
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown graphql error");
            debug!("graphql reported errors");
            return Err(AgentError::Query(first.to_string()));
        }
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CannedHost(Value);

    #[async_trait]
    impl PageHost for CannedHost {
        async fn eval(&self, _expression: &str) -> Result<Value, AgentError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn accepts_clean_response() {
        let host = CannedHost(json!({"ok": true, "status": 200, "body": {"data": {"x": 1}}}));
        let transport = PageFetchTransport::new(host, "/graphql");
        let out = transport.post("{}", "tok").await.unwrap();
        assert_eq!(out["data"]["x"], 1);
    }

    #[tokio::test]
    async fn rejects_transport_failure() {
        let host = CannedHost(json!({"ok": false, "status": 503, "body": null}));
        let transport = PageFetchTransport::new(host, "/graphql");
        let err = transport.post("{}", "tok").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn rejects_bare_errors_key() {
        let host = CannedHost(json!({"ok": true, "status": 200, "body": {"errors": []}}));
        let transport = PageFetchTransport::new(host, "/graphql");
        let err = transport.post("{}", "tok").await.unwrap_err();
        assert!(err.to_string().contains("unknown graphql error"));
    }

    #[tokio::test]
    async fn rejects_api_error_list() {
        let host = CannedHost(json!({
            "ok": true,
            "status": 200,
            "body": {"errors": [{"message": "not authorized"}]}
        }));
        let transport = PageFetchTransport::new(host, "/graphql");
        let err = transport.post("{}", "tok").await.unwrap_err();
        assert!(err.to_string().contains("not authorized"));
    }

    #[test]
    fn script_escapes_payload() {
        let host = CannedHost(Value::Null);
        let transport = PageFetchTransport::new(host, "/graphql");
        let script = transport.fetch_script(r#"{"a": "b\"c"}"#, "tok\"en");
        assert!(script.contains(r#"{\"a\": \"b\\\"c\"}"#));
        assert!(script.contains(r#""tok\"en""#));
    }
}
