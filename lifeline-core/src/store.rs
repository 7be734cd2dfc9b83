//! Candidate store: the single owner of resolution state. The resolver
//! computes a `ResolutionOutcome` after each tier attempt and applies it here
//! atomically; nothing mutates the store mid-traversal.

use serde::{Deserialize, Serialize};

use crate::host::Host;

/// One cloud registry: a named opaque URL returning an encrypted host list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRegistry {
    pub name: String,
    pub url: String,
}

/// Advertisement block carried by the winning conf reply. The decoded image is
/// recomputed only when the image reference changes (decoding is expensive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    pub name: String,
    pub image: String,
    pub url: String,
    pub position: String,
    pub decoded_image: Option<String>,
}

/// Frontend-URL update carried by an outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontUpdate {
    /// The tier attempt did not race frontend candidates.
    Keep,
    /// Fastest alive frontend host.
    Set(Host),
    /// Candidates were raced and none was alive.
    Clear,
}

/// Result of one tier attempt, applied to the store in a single step.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub endpoint: Option<Host>,
    pub hosts: Vec<Host>,
    pub front_url: FrontUpdate,
    pub advert: Option<Advertisement>,
    pub failed_hosts: Vec<Host>,
}

impl ResolutionOutcome {
    pub fn success(
        endpoint: Host,
        hosts: Vec<Host>,
        front_url: FrontUpdate,
        advert: Option<Advertisement>,
        failed_hosts: Vec<Host>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint),
            hosts,
            front_url,
            advert,
            failed_hosts,
        }
    }

    /// Every considered candidate failed: the endpoint and the direct list are
    /// cleared; the frontend URL and advertisement are left as they were.
    pub fn failure(failed_hosts: Vec<Host>) -> Self {
        Self {
            endpoint: None,
            hosts: Vec::new(),
            front_url: FrontUpdate::Keep,
            advert: None,
            failed_hosts,
        }
    }
}

/// Persisted slice of the store: host list and resolved endpoint only.
/// Failure sets are run-scoped and never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub hosts: Vec<String>,
    pub endpoint: Option<String>,
}

/// Process state owned by the resolution engine and read by API callers.
#[derive(Debug, Clone, Default)]
pub struct CandidateStore {
    pub hosts: Vec<Host>,
    pub clouds: Vec<CloudRegistry>,
    pub api_endpoint: Option<Host>,
    pub front_url: Option<Host>,
    pub advert: Option<Advertisement>,
    pub failed_hosts: Vec<Host>,
    pub failed_clouds: Vec<String>,
}

impl CandidateStore {
    pub fn new(hosts: Vec<Host>, clouds: Vec<CloudRegistry>) -> Self {
        Self {
            hosts,
            clouds,
            ..Default::default()
        }
    }

    /// Reset run-scoped failure bookkeeping. Called once per `init_api_hosts`
    /// run; the sets are shared across that run's direct and cloud phases.
    pub fn begin_run(&mut self) {
        self.failed_hosts.clear();
        self.failed_clouds.clear();
    }

    /// Whether a fresh image decode is required for this image reference.
    pub fn needs_image_decode(&self, image: &str) -> bool {
        match &self.advert {
            Some(a) => a.image != image,
            None => true,
        }
    }

    pub fn record_failed_cloud(&mut self, url: &str) {
        if !self.failed_clouds.iter().any(|u| u == url) {
            self.failed_clouds.push(url.to_string());
        }
    }

    /// Apply one tier attempt's outcome in a single step.
    pub fn apply(&mut self, outcome: ResolutionOutcome) {
        for h in outcome.failed_hosts {
            if !self.failed_hosts.contains(&h) {
                self.failed_hosts.push(h);
            }
        }
        self.api_endpoint = outcome.endpoint;
        self.hosts = outcome.hosts;
        match outcome.front_url {
            FrontUpdate::Keep => {}
            FrontUpdate::Set(h) => self.front_url = Some(h),
            FrontUpdate::Clear => self.front_url = None,
        }
        if let Some(mut advert) = outcome.advert {
            // Write-avoidance: an unchanged image reference keeps the decode
            // already stored.
            if advert.decoded_image.is_none() {
                if let Some(existing) = &self.advert {
                    if existing.image == advert.image {
                        advert.decoded_image = existing.decoded_image.clone();
                    }
                }
            }
            self.advert = Some(advert);
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            hosts: self.hosts.iter().map(|h| h.as_str().to_string()).collect(),
            endpoint: self.api_endpoint.as_ref().map(|h| h.as_str().to_string()),
        }
    }

    /// Restore host list and endpoint from a persisted snapshot; entries that
    /// no longer parse are dropped.
    pub fn restore(&mut self, snapshot: &StoreSnapshot) {
        let restored: Vec<Host> = snapshot.hosts.iter().filter_map(|h| Host::parse(h)).collect();
        if !restored.is_empty() {
            self.hosts = restored;
        }
        self.api_endpoint = snapshot.endpoint.as_deref().and_then(Host::parse);
    }
}
