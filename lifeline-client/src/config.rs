//! Load config from file and environment. File:
//! ~/.config/lifeline/config.toml or /etc/lifeline/config.toml.
//! Env overrides: LIFELINE_BACKEND_URL, LIFELINE_REPORT_API, LIFELINE_SECRET,
//! LIFELINE_STATE_PATH, LIFELINE_PROBE_TIMEOUT_MS.

use serde::Deserialize;
use std::path::PathBuf;

use lifeline_core::CloudRegistry;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Direct-tier candidate hosts.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Cloud registries, tried strictly in order after the direct tier.
    #[serde(default)]
    pub clouds: Vec<CloudRegistry>,
    /// Telemetry backend base URL.
    #[serde(default)]
    pub backend_url: String,
    /// Domain-failure report base URL.
    #[serde(default)]
    pub report_api: String,
    /// Best-effort region lookup endpoint.
    #[serde(default = "default_geo_url")]
    pub geo_url: String,
    /// Shared secret for the envelope codec.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub product_code: String,
    #[serde(default)]
    pub promo_code: String,
    #[serde(default)]
    pub channel_code: String,
    /// Per-probe timeout for the conf endpoint (ms, default 4000).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Per-probe timeout for the frontend liveness check (ms).
    #[serde(default = "default_probe_timeout_ms")]
    pub front_timeout_ms: u64,
    /// Telemetry dispatch timeout (ms, default 5000).
    #[serde(default = "default_telemetry_timeout_ms")]
    pub telemetry_timeout_ms: u64,
    /// Persisted key-value store location.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

fn default_geo_url() -> String {
    "https://ipapi.co/json/".to_string()
}
fn default_probe_timeout_ms() -> u64 {
    4000
}
fn default_telemetry_timeout_ms() -> u64 {
    5000
}
fn default_state_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/lifeline/state.json"),
        None => PathBuf::from("lifeline-state.json"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            clouds: Vec::new(),
            backend_url: String::new(),
            report_api: String::new(),
            geo_url: default_geo_url(),
            secret: String::new(),
            app_id: String::new(),
            product_code: String::new(),
            promo_code: String::new(),
            channel_code: String::new(),
            probe_timeout_ms: default_probe_timeout_ms(),
            front_timeout_ms: default_probe_timeout_ms(),
            telemetry_timeout_ms: default_telemetry_timeout_ms(),
            state_path: default_state_path(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LIFELINE_BACKEND_URL") {
        c.backend_url = s;
    }
    if let Ok(s) = std::env::var("LIFELINE_REPORT_API") {
        c.report_api = s;
    }
    if let Ok(s) = std::env::var("LIFELINE_SECRET") {
        c.secret = s;
    }
    if let Ok(s) = std::env::var("LIFELINE_STATE_PATH") {
        c.state_path = PathBuf::from(s);
    }
    if let Ok(s) = std::env::var("LIFELINE_PROBE_TIMEOUT_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            c.probe_timeout_ms = ms;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/lifeline/config.toml"));
    }
    out.push(PathBuf::from("/etc/lifeline/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let c: Config = toml::from_str(
            r#"
            hosts = ["https://a.test", "https://b.test"]
            secret = "s"

            [[clouds]]
            name = "worker"
            url = "https://r1.test"
            "#,
        )
        .unwrap();
        assert_eq!(c.hosts.len(), 2);
        assert_eq!(c.clouds[0].name, "worker");
        assert_eq!(c.probe_timeout_ms, 4000);
        assert_eq!(c.telemetry_timeout_ms, 5000);
        assert_eq!(c.geo_url, "https://ipapi.co/json/");
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("bogus_field = 1").is_err());
    }
}
