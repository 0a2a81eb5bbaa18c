//! HTTP hooks client (spec §6 "HTTP hooks"): fires
//! `on_publish`/`on_unpublish`/`on_play`/`on_stop`/`on_dvr`/`on_hls`/
//! `on_hls_notify`/`on_forward_backend`/`on_connect`/`on_close` against
//! configured URLs. Failures are logged, never fatal (spec §6).

use std::time::Duration;

use serde::Serialize;

const HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Event name sent in the hook payload, matching the collaborator names in
/// spec §6 verbatim so operators can grep their hook server logs against
/// the spec's own vocabulary.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    OnPublish,
    OnUnpublish,
    OnPlay,
    OnStop,
    OnDvr,
    OnHls,
    OnHlsNotify,
    OnForwardBackend,
    OnConnect,
    OnClose,
}

#[derive(Debug, Serialize)]
struct HookPayload<'a> {
    event: HookEvent,
    vhost: &'a str,
    app: &'a str,
    stream: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
}

/// Fires hook calls against a set of configured URLs. Cloned cheaply (the
/// underlying `reqwest::Client` pools connections internally, mirroring the
/// teacher's dev-only `reqwest` usage in its end-to-end harness).
#[derive(Clone)]
pub struct HookClient {
    client: reqwest::Client,
}

impl HookClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HOOK_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Calls `event` against every URL in `urls` in turn, logging but not
    /// propagating failures (spec §6: "failures of non-critical hooks are
    /// logged, not fatal").
    pub async fn fire(
        &self,
        urls: &[String],
        event: HookEvent,
        vhost: &str,
        app: &str,
        stream: &str,
        file_path: Option<&str>,
        client_id: Option<&str>,
    ) {
        if urls.is_empty() {
            return;
        }
        let payload = HookPayload {
            event,
            vhost,
            app,
            stream,
            file_path,
            client_id,
        };
        for url in urls {
            self.call_one(url, &payload).await;
        }
    }

    async fn call_one(&self, url: &str, payload: &HookPayload<'_>) {
        match self.client.post(url).json(payload).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(url, status = %resp.status(), "hook returned non-success status");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(url, error = %err, "hook call failed");
            }
        }
    }
}

impl Default for HookClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fire_with_no_urls_is_a_no_op() {
        let client = HookClient::new();
        client
            .fire(&[], HookEvent::OnPublish, "v", "app", "stream", None, None)
            .await;
    }
}
