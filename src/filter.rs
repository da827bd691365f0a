//! Host filter list: requests to a filtered host are rejected with 403
//! before an upstream connection is ever attempted.
//!
//! Grounded on `examples/original_source/proxy/src/proxy.c`'s
//! `Proxy_readFilterList`, `Proxy_addFilter`, and `Proxy_isFiltered`
//! (substring match against each loaded entry): the same request-admission
//! path `Proxy` drives before ever dialing upstream.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::ProxyResult;

#[derive(Debug, Default, Clone)]
pub struct HostFilter {
    entries: Vec<String>,
}

impl HostFilter {
    pub fn empty() -> Self {
        HostFilter { entries: Vec::new() }
    }

    /// Loads one filter entry per non-blank, non-comment line.
    pub fn load(path: &Path) -> ProxyResult<Self> {
        let contents = fs::read_to_string(path)?;
        let entries: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        info!(path = %path.display(), count = entries.len(), "loaded host filter list");
        Ok(HostFilter { entries })
    }

    /// `true` if `host` contains any loaded filter entry as a substring,
    /// matching the original's plain `strstr` check.
    pub fn is_filtered(&self, host: &str) -> bool {
        self.entries.iter().any(|entry| host.contains(entry.as_str()))
    }
}
