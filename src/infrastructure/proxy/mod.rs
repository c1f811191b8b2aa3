//! Proxy plumbing: list loading, reachability probes and tunnel dialing.

pub mod list;
pub mod resolver;
pub mod tunnel;

pub use list::{load_proxies, parse_proxy_list};
pub use resolver::HttpProbeResolver;
