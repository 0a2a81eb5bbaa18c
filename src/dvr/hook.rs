//! Async `on_dvr` hook worker: a closed fragment is enqueued here and the
//! hook call happens off the segmenter's critical path (spec §4.15 "When a
//! fragment closes it is enqueued into an async worker").

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::hooks::{HookClient, HookEvent};
use crate::source::StreamRequest;

#[derive(Debug, Clone)]
pub struct ClosedFragment {
    pub request: StreamRequest,
    pub file_path: String,
}

/// Spawns a background task draining closed fragments and firing `on_dvr`
/// against every configured URL for each one.
pub struct DvrHookWorker {
    sender: mpsc::UnboundedSender<ClosedFragment>,
}

impl DvrHookWorker {
    pub fn spawn(hook_client: HookClient, urls: Vec<String>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ClosedFragment>();
        tokio::spawn(async move {
            while let Some(fragment) = receiver.recv().await {
                hook_client
                    .fire(
                        &urls,
                        HookEvent::OnDvr,
                        &fragment.request.vhost,
                        &fragment.request.app,
                        &fragment.request.stream,
                        Some(&fragment.file_path),
                        None,
                    )
                    .await;
            }
        });
        Self { sender }
    }

    /// Enqueues a closed fragment for hook delivery; silently drops if the
    /// worker task has already shut down.
    pub fn enqueue(&self, fragment: ClosedFragment) {
        let _ = self.sender.send(fragment);
    }
}

impl Clone for DvrHookWorker {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

pub fn shared_hook_client() -> Arc<HookClient> {
    Arc::new(HookClient::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn enqueue_does_not_panic_with_no_urls() {
        let worker = DvrHookWorker::spawn(HookClient::new(), Vec::new());
        worker.enqueue(ClosedFragment {
            request: StreamRequest {
                vhost: "v".to_string(),
                app: "a".to_string(),
                stream: "s".to_string(),
                params: HashMap::new(),
            },
            file_path: "/tmp/x.flv".to_string(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
