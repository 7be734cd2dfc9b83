//! Telemetry dispatch with idempotent gates: once per local calendar day for
//! "click", once per install lifetime for "install". Gate markers advance only
//! after a successful dispatch, so a failed attempt stays eligible for the
//! next natural trigger.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use lifeline_core::{build_envelope, unix_timestamp, DeviceIdentity};
use tracing::{debug, info, warn};

use crate::flight::FlightGuard;
use crate::probe::{ProbeError, ProbeTransport};
use crate::storage::{
    device_id, Storage, DAILY_REPORT_KEY, LIFETIME_REPORT_KEY, LOCAL_SNAPSHOT_KEY,
};

const TRACK_PATH: &str = "/track/action";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Envelope(#[from] lifeline_core::EnvelopeError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Static configuration of the telemetry pipeline.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySettings {
    pub app_id: String,
    pub product_code: String,
    pub promo_code: String,
    pub channel_code: String,
    pub backend_url: String,
    pub timeout: Duration,
}

pub struct TelemetryReporter {
    transport: Arc<dyn ProbeTransport>,
    storage: Arc<dyn Storage>,
    secret: String,
    settings: TelemetrySettings,
    /// Suppresses concurrent daily runs; released only after the dispatch
    /// attempt completes, success or failure.
    running: AtomicBool,
}

impl TelemetryReporter {
    pub fn new(
        transport: Arc<dyn ProbeTransport>,
        storage: Arc<dyn Storage>,
        secret: String,
        settings: TelemetrySettings,
    ) -> Self {
        Self {
            transport,
            storage,
            secret,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Daily gate: no-op when a report already ran today (local calendar day)
    /// or another run is in progress. The marker advances only on success;
    /// the guard is released with the attempt, even a cancelled one.
    pub async fn run_once_per_day(&self) {
        let _guard = match FlightGuard::acquire(&self.running) {
            Some(g) => g,
            None => {
                debug!("daily report already in progress");
                return;
            }
        };
        if self.should_run_today() {
            match self.dispatch("click").await {
                Ok(()) => {
                    self.storage
                        .set(DAILY_REPORT_KEY, &Local::now().to_rfc3339());
                    info!("daily report dispatched");
                }
                Err(e) => warn!(error = %e, "daily report failed"),
            }
        }
    }

    /// Lifetime gate: dispatches on the first call ever; the persisted marker,
    /// once written, is never cleared by normal operation.
    pub async fn first_visit_in_app(&self) {
        if self.storage.get(LIFETIME_REPORT_KEY).as_deref() == Some("1") {
            return;
        }
        match self.dispatch("install").await {
            Ok(()) => {
                self.storage.set(LIFETIME_REPORT_KEY, "1");
                info!("install report dispatched");
            }
            Err(e) => warn!(error = %e, "install report failed"),
        }
    }

    fn should_run_today(&self) -> bool {
        let last = match self.storage.get(DAILY_REPORT_KEY) {
            Some(v) => v,
            None => return true,
        };
        match chrono::DateTime::parse_from_rfc3339(&last) {
            Ok(t) => t.with_timezone(&Local).date_naive() != Local::now().date_naive(),
            // An unreadable marker never blocks the report.
            Err(_) => true,
        }
    }

    /// The shared pipeline behind both gates: device/fingerprint init, local
    /// snapshot, envelope build, dispatch.
    async fn dispatch(&self, action_type: &str) -> Result<(), DispatchError> {
        let identity = DeviceIdentity::new(device_id(self.storage.as_ref()));
        self.save_local_snapshot(&identity);

        let timestamp = unix_timestamp();
        let plaintext = serde_json::json!({
            "actionType": action_type,
            "promoCode": self.settings.promo_code,
            "channelCode": self.settings.channel_code,
            "productCode": self.settings.product_code,
            "timestamp": timestamp,
        })
        .to_string();
        let envelope = build_envelope(&plaintext, &self.secret)?;

        let headers = vec![
            ("X-Device-Id".to_string(), identity.device_id.clone()),
            ("X-App-Id".to_string(), self.settings.app_id.clone()),
            ("X-Platform".to_string(), identity.platform.clone()),
            ("X-VisitorID".to_string(), identity.visitor_id.clone()),
            ("X-FP-RequestID".to_string(), identity.request_id.clone()),
            ("X-Nonce".to_string(), envelope.nonce.clone()),
            ("X-Timestamp".to_string(), envelope.timestamp.to_string()),
            ("X-Signature".to_string(), envelope.signature.clone()),
        ];
        self.transport
            .post_envelope(
                &format!("{}{TRACK_PATH}", self.settings.backend_url),
                &envelope,
                &headers,
                self.settings.timeout,
            )
            .await?;
        Ok(())
    }

    /// Persist the one-time install snapshot; written only if absent.
    fn save_local_snapshot(&self, identity: &DeviceIdentity) {
        if self.storage.get(LOCAL_SNAPSHOT_KEY).is_some() {
            return;
        }
        let snapshot = serde_json::json!({
            "code": self.settings.promo_code,
            "chan": self.settings.channel_code,
            "product_id": self.settings.product_code,
            "appId": self.settings.app_id,
            "device_id": identity.device_id,
            "visitor_id": identity.visitor_id,
            "create_time": unix_timestamp(),
            "platform": identity.platform,
        });
        self.storage.set(LOCAL_SNAPSHOT_KEY, &snapshot.to_string());
    }
}
