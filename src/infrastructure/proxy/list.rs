//! Proxy list loading.
//!
//! One descriptor per line. Blank lines and `#` comments are skipped, and
//! lines that fail to normalize are logged and dropped.

use std::io;
use std::path::Path;

use tracing::{info, warn};

use crate::domain::ProxyDescriptor;

/// Read and normalize the proxy list at `path`.
pub async fn load_proxies(path: impl AsRef<Path>) -> io::Result<Vec<ProxyDescriptor>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;
    let proxies = parse_proxy_list(&content);
    info!(path = %path.display(), count = proxies.len(), "Loaded proxy list");
    Ok(proxies)
}

pub fn parse_proxy_list(content: &str) -> Vec<ProxyDescriptor> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match ProxyDescriptor::parse(line) {
                Ok(proxy) => Some(proxy),
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Skipping proxy entry");
                    None
                }
            }
        })
        .collect()
}
