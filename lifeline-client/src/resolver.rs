//! Multi-tier endpoint resolver: race the direct candidates concurrently and
//! rank by latency, then walk the cloud registries in order when the direct
//! tier is exhausted. One resolver instance owns all run state; the
//! single-flight guard keeps overlapping resolutions from racing writes.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use futures::future::join_all;
use lifeline_core::{
    fastest, merge_hosts, unseal_host, Advertisement, CandidateStore, FrontUpdate, Host,
    ResolutionOutcome, StoreSnapshot,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::flight::FlightGuard;
use crate::probe::{ConfData, ProbeTransport};
use crate::report::FailureReporter;

type ImageDecoder = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct Resolver {
    transport: Arc<dyn ProbeTransport>,
    store: Mutex<CandidateStore>,
    /// Single-flight guard: true strictly while one resolution is in flight.
    in_flight: AtomicBool,
    secret: String,
    reporter: Option<Arc<FailureReporter>>,
    /// Expensive image decode, invoked only when the advert image reference
    /// changed. The real decryptor lives outside this crate.
    image_decoder: ImageDecoder,
}

impl Resolver {
    pub fn new(transport: Arc<dyn ProbeTransport>, store: CandidateStore, secret: String) -> Self {
        Self {
            transport,
            store: Mutex::new(store),
            in_flight: AtomicBool::new(false),
            secret,
            reporter: None,
            image_decoder: Box::new(|image| Some(image.to_string())),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_image_decoder(mut self, decoder: ImageDecoder) -> Self {
        self.image_decoder = decoder;
        self
    }

    /// Last resolved endpoint, if any.
    pub async fn endpoint(&self) -> Option<Host> {
        self.store.lock().await.api_endpoint.clone()
    }

    /// Fastest alive frontend host from the last successful run.
    pub async fn front_url(&self) -> Option<Host> {
        self.store.lock().await.front_url.clone()
    }

    pub async fn advert(&self) -> Option<Advertisement> {
        self.store.lock().await.advert.clone()
    }

    pub async fn failed_hosts(&self) -> Vec<Host> {
        self.store.lock().await.failed_hosts.clone()
    }

    pub async fn failed_clouds(&self) -> Vec<String> {
        self.store.lock().await.failed_clouds.clone()
    }

    pub async fn hosts(&self) -> Vec<Host> {
        self.store.lock().await.hosts.clone()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.store.lock().await.snapshot()
    }

    pub async fn restore(&self, snapshot: &StoreSnapshot) {
        self.store.lock().await.restore(snapshot);
    }

    /// Top-level entry. If a resolution is already in flight, the last known
    /// endpoint is returned immediately and no new work starts. Failure sets
    /// are reset here and shared across the direct and cloud phases of this
    /// run. Never returns an error: "no endpoint" is `None`.
    pub async fn init_api_hosts(&self) -> Option<Host> {
        // The guard releases the flag in Drop, so a caller cancelling this
        // future mid-resolution cannot wedge later runs.
        let _guard = match FlightGuard::acquire(&self.in_flight) {
            Some(g) => g,
            None => {
                debug!("resolution already in flight, returning last endpoint");
                return self.endpoint().await;
            }
        };
        self.store.lock().await.begin_run();

        match self.resolve_direct().await {
            Some(host) => Some(host),
            None => self.resolve_cloud().await,
        }
    }

    /// Direct tier: probe every candidate concurrently, wait for all probes to
    /// settle, pick the fastest success (ties keep list order). Candidates in
    /// the store are already scheme-checked `Host`s, so only de-duplication
    /// happens here. Losers still complete: their results are discarded after
    /// the fan-in point, and extra hosts are only taken from the winner.
    pub async fn resolve_direct(&self) -> Option<Host> {
        let previous = { self.store.lock().await.hosts.clone() };
        let mut candidates: Vec<Host> = Vec::with_capacity(previous.len());
        for h in &previous {
            if !candidates.contains(h) {
                candidates.push(h.clone());
            }
        }

        if candidates.is_empty() {
            debug!("direct tier: no candidates, skipping network");
            self.store.lock().await.apply(ResolutionOutcome::failure(Vec::new()));
            return None;
        }

        info!(count = candidates.len(), "racing direct candidates");
        let probes = candidates.iter().map(|h| {
            let transport = Arc::clone(&self.transport);
            let host = h.clone();
            async move { transport.conf(host.as_str()).await }
        });
        let results = join_all(probes).await;

        let samples: Vec<Option<u64>> = results
            .iter()
            .map(|r| match r {
                Ok(p) if p.value.is_success() => Some(p.elapsed_ms),
                _ => None,
            })
            .collect();

        let failed: Vec<Host> = candidates
            .iter()
            .zip(&samples)
            .filter(|(_, s)| s.is_none())
            .map(|(h, _)| h.clone())
            .collect();
        for (host, result) in candidates.iter().zip(&results) {
            match result {
                Err(e) => warn!(host = %host, error = %e, "conf probe failed"),
                Ok(p) if !p.value.is_success() => {
                    warn!(host = %host, errcode = p.value.errcode, "conf probe rejected")
                }
                Ok(p) => debug!(host = %host, elapsed_ms = p.elapsed_ms, "conf probe alive"),
            }
        }
        self.report_failed(&failed);

        let win_idx = match fastest(&samples) {
            Some(i) => i,
            None => {
                warn!("direct tier exhausted");
                self.store.lock().await.apply(ResolutionOutcome::failure(failed));
                return None;
            }
        };
        let winner = candidates[win_idx].clone();
        let data = match &results[win_idx] {
            Ok(p) => p.value.data.clone().unwrap_or_default(),
            Err(_) => ConfData::default(),
        };
        info!(host = %winner, elapsed_ms = samples[win_idx].unwrap_or(0), "direct tier resolved");

        // Sealed host strings advertised by the winner; items that fail to
        // unseal or parse are skipped.
        let discovered: Vec<Host> = data
            .apis
            .unwrap_or_default()
            .iter()
            .filter_map(|item| unseal_host(item, &self.secret).ok())
            .filter_map(|u| Host::parse(&u))
            .collect();

        let (merged, advert) = {
            let store = self.store.lock().await;
            let mut all_failed = store.failed_hosts.clone();
            for h in &failed {
                if !all_failed.contains(h) {
                    all_failed.push(h.clone());
                }
            }
            let merged = merge_hosts(&winner, &discovered, &candidates, &all_failed);
            let advert = data.advert.map(|w| {
                let decoded_image = if store.needs_image_decode(&w.image) {
                    (self.image_decoder)(&w.image)
                } else {
                    None
                };
                Advertisement {
                    name: w.name,
                    image: w.image,
                    url: w.url,
                    position: w.position,
                    decoded_image,
                }
            });
            (merged, advert)
        };

        let front = self
            .race_front_urls(data.urls.unwrap_or_default())
            .await;

        self.store.lock().await.apply(ResolutionOutcome::success(
            winner.clone(),
            merged,
            front,
            advert,
            failed,
        ));
        Some(winner)
    }

    /// Race the winner's frontend candidates on the liveness path (HTTP 200 on
    /// `/ping.txt`), same fan-out-and-rank shape with its own timeout.
    async fn race_front_urls(&self, urls: Vec<String>) -> FrontUpdate {
        let candidates: Vec<Host> = urls.iter().filter_map(|u| Host::parse(u)).collect();
        if candidates.is_empty() {
            return FrontUpdate::Clear;
        }
        let pings = candidates.iter().map(|h| {
            let transport = Arc::clone(&self.transport);
            let host = h.clone();
            async move { transport.ping(host.as_str()).await }
        });
        let results = join_all(pings).await;
        let samples: Vec<Option<u64>> = results.iter().map(|r| r.as_ref().ok().copied()).collect();
        match fastest(&samples) {
            Some(i) => {
                info!(host = %candidates[i], "frontend candidate alive");
                FrontUpdate::Set(candidates[i].clone())
            }
            None => {
                warn!("no frontend candidate alive");
                FrontUpdate::Clear
            }
        }
    }

    /// Cloud tier: registries are slow mirrors, tried strictly in order rather
    /// than raced. The first registry whose decrypted hosts yield a working
    /// direct resolution wins the tier.
    pub async fn resolve_cloud(&self) -> Option<Host> {
        let clouds = { self.store.lock().await.clouds.clone() };
        info!(count = clouds.len(), "falling back to cloud registries");

        for cloud in clouds {
            info!(name = %cloud.name, url = %cloud.url, "fetching cloud registry");
            let body = match self.transport.fetch_text(&cloud.url).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(name = %cloud.name, error = %e, "cloud registry fetch failed");
                    self.store.lock().await.record_failed_cloud(&cloud.url);
                    continue;
                }
            };
            let items = match parse_registry_body(&body) {
                Some(items) => items,
                None => {
                    warn!(name = %cloud.name, "cloud registry body unparsable");
                    self.store.lock().await.record_failed_cloud(&cloud.url);
                    continue;
                }
            };
            // Items that fail to unseal are skipped; only a fully empty yield
            // fails the registry.
            let mut hosts: Vec<Host> = Vec::new();
            for item in &items {
                if let Ok(plain) = unseal_host(item, &self.secret) {
                    if let Some(host) = Host::parse(&plain) {
                        if !hosts.contains(&host) {
                            hosts.push(host);
                        }
                    }
                }
            }
            if hosts.is_empty() {
                warn!(name = %cloud.name, "cloud registry yielded no valid hosts");
                self.store.lock().await.record_failed_cloud(&cloud.url);
                continue;
            }
            info!(name = %cloud.name, count = hosts.len(), "cloud registry decrypted hosts");

            // Replace the direct candidate list and retry the direct tier.
            self.store.lock().await.hosts = hosts;
            if let Some(host) = self.resolve_direct().await {
                info!(name = %cloud.name, host = %host, "cloud tier resolved");
                return Some(host);
            }
            warn!(name = %cloud.name, "all decrypted hosts failed");
            self.store.lock().await.record_failed_cloud(&cloud.url);
        }

        warn!("cloud tier exhausted, no endpoint resolved");
        None
    }

    /// One failure report per domain per `resolve_direct` invocation.
    fn report_failed(&self, failed: &[Host]) {
        let reporter = match &self.reporter {
            Some(r) => r,
            None => return,
        };
        let mut reported: Vec<String> = Vec::new();
        for host in failed {
            let domain = host.hostname().to_string();
            if !reported.contains(&domain) {
                reporter.dispatch(domain.clone());
                reported.push(domain);
            }
        }
    }
}

/// Registry bodies are either a JSON array of sealed strings or a JSON string
/// wrapping such an array. Anything else is a registry-level parse failure.
fn parse_registry_body(body: &str) -> Option<Vec<String>> {
    if let Ok(items) = serde_json::from_str::<Vec<String>>(body) {
        return Some(items);
    }
    let inner = serde_json::from_str::<String>(body).ok()?;
    serde_json::from_str::<Vec<String>>(&inner).ok()
}
