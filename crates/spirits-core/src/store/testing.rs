//! Test doubles shared by the strategy, selector and sync tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::api::{FetchError, FetchedBinary, Resource, ResourceFetcher, ResourceKind};

/// Enough permits to let every pending fetch through at once.
const RELEASE_PERMITS: usize = 1 << 16;

/// Fetcher that counts requests per URL and can hold them in flight.
///
/// Binary requests answer `bytes:<url>` as `image/png`; text requests answer
/// whatever was registered with [`MockFetcher::set_text`].
#[derive(Default)]
pub(crate) struct MockFetcher {
    calls: Mutex<HashMap<String, usize>>,
    texts: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    gate: Option<Semaphore>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests block until [`release`](Self::release) is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(RELEASE_PERMITS);
        }
    }

    pub fn set_text(&self, url: &str, body: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    async fn fetch(&self, url: &str, kind: ResourceKind) -> Result<Resource, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }

        if self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::NotFound(url.to_string()));
        }

        match kind {
            ResourceKind::Binary => Ok(Resource::Binary(FetchedBinary {
                bytes: format!("bytes:{}", url).into_bytes(),
                content_type: Some("image/png".to_string()),
            })),
            ResourceKind::Text => self
                .texts
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .map(Resource::Text)
                .ok_or_else(|| FetchError::NotFound(url.to_string())),
            ResourceKind::Json => Err(FetchError::InvalidResponse(url.to_string())),
        }
    }
}

/// Wait until `fetcher` has seen `count` requests for `url`.
pub(crate) async fn wait_for_calls(fetcher: &MockFetcher, url: &str, count: usize) {
    for _ in 0..500 {
        if fetcher.calls(url) >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("expected {count} call(s) for {url}, saw {}", fetcher.calls(url));
}
