//! Candidate hosts: normalized URLs, probe status, latency ranking, list merging.

use serde::{Deserialize, Serialize};

/// A candidate endpoint. Holds the normalized URL (trailing slashes stripped);
/// equality is by normalized URL.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Host(String);

impl Host {
    /// Parse a candidate URL. Returns `None` unless the string carries an
    /// `http://` or `https://` scheme.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if !is_valid_url(trimmed) {
            return None;
        }
        Some(Host(normalize(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hostname component of the URL: scheme and userinfo stripped, cut at the
    /// first path/query/fragment separator, port removed. A string that cannot
    /// be parsed is returned verbatim.
    pub fn hostname(&self) -> &str {
        hostname_of(&self.0)
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Probe status of a host within one resolution run.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HostStatus {
    Untested,
    Alive { elapsed_ms: u64 },
    Failed,
}

/// Only http(s) URLs are valid candidates.
pub fn is_valid_url(u: &str) -> bool {
    let lower = u.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Strip trailing slashes. Hosts compare equal by this form.
pub fn normalize(u: &str) -> String {
    u.trim().trim_end_matches('/').to_string()
}

/// Hostname of a URL-ish string; the raw input when no scheme is present.
pub fn hostname_of(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(i) => &url[i + 3..],
        None => return url,
    };
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(rest);
    // Drop userinfo, then the port.
    let after_user = authority.rsplit('@').next().unwrap_or(authority);
    after_user.split(':').next().unwrap_or(after_user)
}

/// Index of the sample with the strictly smallest elapsed time. Ties keep the
/// earlier-listed entry (stable selection). `None` entries are not alive.
pub fn fastest(samples: &[Option<u64>]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (i, s) in samples.iter().enumerate() {
        if let Some(elapsed) = s {
            match best {
                Some((_, b)) if *elapsed >= b => {}
                _ => best = Some((i, *elapsed)),
            }
        }
    }
    best.map(|(i, _)| i)
}

/// Rebuild the candidate list after a winning probe: the winner first, then
/// hosts newly advertised by the winner, then previously-known hosts that have
/// not failed this run. Hard de-duplication by normalized URL throughout.
pub fn merge_hosts(
    winner: &Host,
    discovered: &[Host],
    previous: &[Host],
    failed: &[Host],
) -> Vec<Host> {
    let mut merged: Vec<Host> = Vec::with_capacity(1 + discovered.len() + previous.len());
    merged.push(winner.clone());
    for h in discovered {
        if !merged.contains(h) {
            merged.push(h.clone());
        }
    }
    for h in previous {
        if !merged.contains(h) && !failed.contains(h) {
            merged.push(h.clone());
        }
    }
    merged
}
