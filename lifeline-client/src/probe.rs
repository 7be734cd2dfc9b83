//! HTTP probe: one timed network call with a bounded timeout, shared by the
//! resolver, the failure reporter and the telemetry dispatch.

use std::time::Duration;

use async_trait::async_trait;
use lifeline_core::{build_envelope, Envelope};
use serde::Deserialize;

pub const CONF_PATH: &str = "/apiv1/latest-redbook-conf";
pub const PING_PATH: &str = "/ping.txt";
pub const USER_AGENT: &str = concat!("lifeline/", env!("CARGO_PKG_VERSION"));

/// Default per-probe timeout. Bounds one tier's worst case to roughly
/// "timeout + jitter" since probes run concurrently.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(4000);

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("envelope error: {0}")]
    Envelope(#[from] lifeline_core::EnvelopeError),
}

/// Validated shape of the conf endpoint's reply. Unknown or missing fields
/// decode to defaults; a body that does not decode at all is a probe failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfReply {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub data: Option<ConfData>,
}

impl ConfReply {
    /// Application-level success: `errcode == 0` with a non-empty payload.
    pub fn is_success(&self) -> bool {
        self.errcode == 0 && self.data.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfData {
    #[serde(default)]
    pub advert: Option<AdvertWire>,
    /// Opaquely-sealed host URLs to merge into the candidate list.
    #[serde(default)]
    pub apis: Option<Vec<String>>,
    /// Plain frontend-URL candidates, raced separately on the liveness path.
    #[serde(default)]
    pub urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvertWire {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub position: String,
}

/// A probe result with its elapsed-time sample.
#[derive(Debug, Clone)]
pub struct Probed<T> {
    pub value: T,
    pub elapsed_ms: u64,
}

/// Seam between the resolution/telemetry logic and the network. The mock
/// implementation in tests scripts latencies and replies per URL.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// POST `{host}/apiv1/latest-redbook-conf` with an envelope body.
    async fn conf(&self, host: &str) -> Result<Probed<ConfReply>, ProbeError>;

    /// GET `{host}/ping.txt`; success is HTTP 200.
    async fn ping(&self, host: &str) -> Result<u64, ProbeError>;

    /// GET a cloud registry or geo endpoint body as text.
    async fn fetch_text(&self, url: &str) -> Result<String, ProbeError>;

    /// POST an envelope body with extra headers; success is any 2xx.
    async fn post_envelope(
        &self,
        url: &str,
        envelope: &Envelope,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<(), ProbeError>;
}

/// reqwest-backed transport.
pub struct HttpProbe {
    client: reqwest::Client,
    secret: String,
    probe_timeout: Duration,
    ping_timeout: Duration,
}

impl HttpProbe {
    pub fn new(secret: String, probe_timeout: Duration, ping_timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;
        Ok(Self {
            client,
            secret,
            probe_timeout,
            ping_timeout,
        })
    }

    fn classify(e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl ProbeTransport for HttpProbe {
    async fn conf(&self, host: &str) -> Result<Probed<ConfReply>, ProbeError> {
        let body = build_envelope(
            &format!("{{\"client\":\"native\",\"timestamp\":{}}}", lifeline_core::unix_timestamp()),
            &self.secret,
        )?;
        let start = tokio::time::Instant::now();
        let resp = self
            .client
            .post(format!("{host}{CONF_PATH}"))
            .timeout(self.probe_timeout)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify)?;
        let reply: ConfReply = resp
            .json()
            .await
            .map_err(|e| ProbeError::Malformed(e.to_string()))?;
        Ok(Probed {
            value: reply,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn ping(&self, host: &str) -> Result<u64, ProbeError> {
        let start = tokio::time::Instant::now();
        let resp = self
            .client
            .get(format!("{host}{PING_PATH}"))
            .header("Cache-Control", "no-cache")
            .timeout(self.ping_timeout)
            .send()
            .await
            .map_err(Self::classify)?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(ProbeError::Status(resp.status().as_u16()));
        }
        Ok(start.elapsed().as_millis() as u64)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ProbeError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(Self::classify)?;
        if !resp.status().is_success() {
            return Err(ProbeError::Status(resp.status().as_u16()));
        }
        resp.text()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))
    }

    async fn post_envelope(
        &self,
        url: &str,
        envelope: &Envelope,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        let mut req = self.client.post(url).timeout(timeout).json(envelope);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(Self::classify)?;
        if !resp.status().is_success() {
            return Err(ProbeError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}
