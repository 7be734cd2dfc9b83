// lifeline: resolve the fastest reachable API endpoint across the direct and
// cloud tiers, persist the learned host list, then run the telemetry gates.
// Prints the resolved endpoint on stdout; exits 1 when every tier fails.

mod config;
mod flight;
mod probe;
mod report;
mod resolver;
mod storage;
mod telemetry;
#[cfg(test)]
mod testutil;

use std::sync::Arc;
use std::time::Duration;

use lifeline_core::{CandidateStore, Host, StoreSnapshot};
use tracing::{info, warn};

use probe::{HttpProbe, ProbeTransport};
use report::FailureReporter;
use resolver::Resolver;
use storage::{JsonFileStore, Storage, STORE_SNAPSHOT_KEY};
use telemetry::{TelemetryReporter, TelemetrySettings};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("lifeline {VERSION}");
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let storage: Arc<dyn Storage> = Arc::new(JsonFileStore::open(cfg.state_path.clone()));

    // Config seeds the candidate list; a persisted snapshot from the last run
    // takes precedence when it still parses.
    let seeds: Vec<Host> = cfg.hosts.iter().filter_map(|h| Host::parse(h)).collect();
    let mut store = CandidateStore::new(seeds, cfg.clouds.clone());
    if let Some(json) = storage.get(STORE_SNAPSHOT_KEY) {
        if let Ok(snap) = serde_json::from_str::<StoreSnapshot>(&json) {
            store.restore(&snap);
        }
    }

    let transport: Arc<dyn ProbeTransport> = Arc::new(HttpProbe::new(
        cfg.secret.clone(),
        Duration::from_millis(cfg.probe_timeout_ms),
        Duration::from_millis(cfg.front_timeout_ms),
    )?);
    let reporter = Arc::new(FailureReporter::new(
        Arc::clone(&transport),
        cfg.report_api.clone(),
        cfg.geo_url.clone(),
        cfg.secret.clone(),
    ));
    let resolver = Resolver::new(Arc::clone(&transport), store, cfg.secret.clone())
        .with_reporter(reporter);
    let telemetry = TelemetryReporter::new(
        Arc::clone(&transport),
        Arc::clone(&storage),
        cfg.secret.clone(),
        TelemetrySettings {
            app_id: cfg.app_id.clone(),
            product_code: cfg.product_code.clone(),
            promo_code: cfg.promo_code.clone(),
            channel_code: cfg.channel_code.clone(),
            backend_url: cfg.backend_url.clone(),
            timeout: Duration::from_millis(cfg.telemetry_timeout_ms),
        },
    );

    let rt = tokio::runtime::Runtime::new()?;
    let endpoint = rt.block_on(async {
        let endpoint = resolver.init_api_hosts().await;

        let snap = resolver.snapshot().await;
        match serde_json::to_string(&snap) {
            Ok(json) => {
                if !storage.set(STORE_SNAPSHOT_KEY, &json) {
                    warn!("could not persist candidate snapshot");
                }
            }
            Err(e) => warn!(error = %e, "could not encode candidate snapshot"),
        }

        if !cfg.backend_url.is_empty() {
            telemetry.first_visit_in_app().await;
            telemetry.run_once_per_day().await;
        }
        endpoint
    });
    // Dropping the runtime abandons any still-pending failure reports; they
    // are fire-and-forget by contract.
    drop(rt);

    match endpoint {
        Some(host) => {
            info!(endpoint = %host, "endpoint resolved");
            println!("{host}");
            Ok(())
        }
        None => {
            warn!("no endpoint resolved, all tiers exhausted");
            std::process::exit(1);
        }
    }
}
