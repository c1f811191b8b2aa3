//! Proxy verification over HTTP.
//!
//! A proxy counts as reachable when an IP-echo service answers through it.
//! The answer doubles as the egress metadata logged for the session.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Proxy};
use tracing::debug;

use crate::domain::{EgressInfo, ProxyDescriptor, ProxyResolver};
use crate::shared::error::ProxyError;

pub struct HttpProbeResolver {
    ip_check_url: String,
    timeout: Duration,
    /// One pooled client per proxy URL, reused across probes
    clients: DashMap<String, Client>,
}

impl HttpProbeResolver {
    pub fn new(ip_check_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ip_check_url: ip_check_url.into(),
            timeout,
            clients: DashMap::new(),
        }
    }

    fn client_for(&self, proxy: &ProxyDescriptor) -> Result<Client, ProxyError> {
        let url = proxy.url();
        if let Some(client) = self.clients.get(&url) {
            return Ok(client.clone());
        }

        let route = Proxy::all(url.as_str())
            .map_err(|e| ProxyError::invalid(proxy.to_string(), e.to_string()))?;
        let client = Client::builder()
            .proxy(route)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProxyError::invalid(proxy.to_string(), e.to_string()))?;

        Ok(self.clients.entry(url).or_insert(client).clone())
    }
}

#[async_trait]
impl ProxyResolver for HttpProbeResolver {
    async fn verify(&self, proxy: &ProxyDescriptor) -> Result<EgressInfo, ProxyError> {
        let client = self.client_for(proxy)?;

        let response = client
            .get(&self.ip_check_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProxyError::unreachable(proxy, e))?;

        let egress = response
            .json::<EgressInfo>()
            .await
            .map_err(|e| ProxyError::unreachable(proxy, e))?;

        debug!(proxy = %proxy, ip = %egress.ip, "Proxy probe succeeded");
        Ok(egress)
    }
}
