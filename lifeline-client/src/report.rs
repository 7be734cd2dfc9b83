//! Fire-and-forget domain-failure reports. Dispatch is spawned and never
//! awaited; a failed report is logged and dropped, it must not surface into
//! the resolution pipeline.

use std::sync::Arc;
use std::time::Duration;

use lifeline_core::{build_envelope, unix_timestamp};
use tracing::{debug, warn};

use crate::probe::{ProbeError, ProbeTransport};

const REPORT_PATH: &str = "/apiv1/domain/log";
const REPORT_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct FailureReporter {
    transport: Arc<dyn ProbeTransport>,
    report_api: String,
    geo_url: String,
    secret: String,
}

impl FailureReporter {
    pub fn new(
        transport: Arc<dyn ProbeTransport>,
        report_api: String,
        geo_url: String,
        secret: String,
    ) -> Self {
        Self {
            transport,
            report_api,
            geo_url,
            secret,
        }
    }

    /// Notify the reporting endpoint that `domain` failed. Returns immediately;
    /// the actual dispatch runs in a spawned task.
    pub fn dispatch(self: &Arc<Self>, domain: String) {
        if self.report_api.is_empty() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.send(&domain).await {
                Ok(()) => debug!(domain = %domain, "failure report sent"),
                Err(e) => warn!(domain = %domain, error = %e, "failure report dropped"),
            }
        });
    }

    async fn send(&self, domain: &str) -> Result<(), ProbeError> {
        let region = self.region().await;
        let plain = serde_json::json!({
            "domain": domain,
            "region": region,
            "access_time": unix_timestamp(),
        })
        .to_string();
        let envelope = build_envelope(&plain, &self.secret)?;
        self.transport
            .post_envelope(
                &format!("{}{REPORT_PATH}", self.report_api),
                &envelope,
                &[],
                REPORT_TIMEOUT,
            )
            .await
    }

    /// Best-effort coarse region lookup; any failure yields "UNKNOWN".
    async fn region(&self) -> String {
        let body = match self.transport.fetch_text(&self.geo_url).await {
            Ok(b) => b,
            Err(_) => return "UNKNOWN".to_string(),
        };
        serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("country_code")
                    .and_then(|c| c.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}
