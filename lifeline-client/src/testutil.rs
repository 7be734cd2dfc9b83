//! Scripted transport for tests: per-URL conf/ping replies with programmed
//! latencies, recorded envelope posts. Pairs with paused-clock tokio tests so
//! latency ranking is deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lifeline_core::Envelope;

use crate::probe::{ConfReply, Probed, ProbeError, ProbeTransport};

/// Scripted behavior of one conf probe.
pub enum ConfScript {
    /// Respond with this JSON body after `delay_ms`.
    Reply { delay_ms: u64, body: String },
    /// Hang for `delay_ms`, then time out.
    Timeout { delay_ms: u64 },
}

/// One recorded envelope post.
#[derive(Clone)]
pub struct RecordedPost {
    pub url: String,
    pub envelope: Envelope,
    pub headers: Vec<(String, String)>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    conf: Mutex<HashMap<String, ConfScript>>,
    pings: Mutex<HashMap<String, (u64, u16)>>,
    texts: Mutex<HashMap<String, String>>,
    posts: Mutex<Vec<RecordedPost>>,
    conf_calls: AtomicUsize,
    fail_posts: AtomicBool,
    post_delay_ms: AtomicU64,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_conf(&self, host: &str, script: ConfScript) {
        self.conf
            .lock()
            .unwrap()
            .insert(host.to_string(), script);
    }

    pub fn script_ping(&self, host: &str, delay_ms: u64, status: u16) {
        self.pings
            .lock()
            .unwrap()
            .insert(host.to_string(), (delay_ms, status));
    }

    pub fn script_text(&self, url: &str, body: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    pub fn set_post_delay_ms(&self, ms: u64) {
        self.post_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn conf_calls(&self) -> usize {
        self.conf_calls.load(Ordering::SeqCst)
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    async fn conf(&self, host: &str) -> Result<Probed<ConfReply>, ProbeError> {
        self.conf_calls.fetch_add(1, Ordering::SeqCst);
        enum Step {
            Reply(u64, String),
            Timeout(u64),
            Unknown,
        }
        let step = match self.conf.lock().unwrap().get(host) {
            Some(ConfScript::Reply { delay_ms, body }) => Step::Reply(*delay_ms, body.clone()),
            Some(ConfScript::Timeout { delay_ms }) => Step::Timeout(*delay_ms),
            None => Step::Unknown,
        };
        match step {
            Step::Reply(delay_ms, body) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let reply: ConfReply = serde_json::from_str(&body)
                    .map_err(|e| ProbeError::Malformed(e.to_string()))?;
                Ok(Probed {
                    value: reply,
                    elapsed_ms: delay_ms,
                })
            }
            Step::Timeout(delay_ms) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Err(ProbeError::Timeout)
            }
            Step::Unknown => Err(ProbeError::Network(format!("no script for {host}"))),
        }
    }

    async fn ping(&self, host: &str) -> Result<u64, ProbeError> {
        let script = self.pings.lock().unwrap().get(host).copied();
        match script {
            Some((delay_ms, 200)) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(delay_ms)
            }
            Some((delay_ms, status)) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Err(ProbeError::Status(status))
            }
            None => Err(ProbeError::Network(format!("no ping script for {host}"))),
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ProbeError> {
        match self.texts.lock().unwrap().get(url) {
            Some(body) => Ok(body.clone()),
            None => Err(ProbeError::Network(format!("no text script for {url}"))),
        }
    }

    async fn post_envelope(
        &self,
        url: &str,
        envelope: &Envelope,
        headers: &[(String, String)],
        _timeout: Duration,
    ) -> Result<(), ProbeError> {
        let delay = self.post_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(ProbeError::Status(500));
        }
        self.posts.lock().unwrap().push(RecordedPost {
            url: url.to_string(),
            envelope: envelope.clone(),
            headers: headers.to_vec(),
        });
        Ok(())
    }
}
