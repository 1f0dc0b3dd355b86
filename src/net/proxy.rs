use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::Url;

/// Reserved blocks that are reached directly when `bypass_private` is set.
///
/// Loopback is not a private network, it is listed here for convenience.
const PRIVATE_NETWORKS: &[(IpAddr, u8)] = &[
    (IpAddr::V4(Ipv4Addr::new(127, 0, 0, 0)), 8),
    (IpAddr::V6(Ipv6Addr::LOCALHOST), 128),
    (IpAddr::V4(Ipv4Addr::new(169, 254, 0, 0)), 16),
    (IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0)), 10),
    (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 8),
    (IpAddr::V4(Ipv4Addr::new(172, 16, 0, 0)), 12),
    (IpAddr::V4(Ipv4Addr::new(192, 168, 0, 0)), 16),
    (IpAddr::V6(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0)), 7),
];

/// Decides, per URL, whether a request goes through the configured proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyRule {
    pub bypass_private: bool,
    pub bypass_domains: Vec<String>,
}

impl ProxyRule {
    /// Returns `true` if the request should use the proxy.
    ///
    /// URLs without a host always use the proxy; the request will fail on its
    /// own terms.
    pub fn should_proxy(&self, url: &Url) -> bool {
        if !self.bypass_private && self.bypass_domains.is_empty() {
            return true;
        }

        let Some(host) = url.host_str() else {
            return true;
        };
        // IPv6 hosts come back bracketed from host_str()
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if self.bypass_private {
            if let Ok(ip) = host.parse::<IpAddr>() {
                if is_private_ip(&ip) {
                    return false;
                }
            }
        }

        !self
            .bypass_domains
            .iter()
            .any(|domain| matches_domain(host, domain))
    }
}

/// `host` is `domain` itself or a subdomain of it. The suffix has to start on
/// a label boundary, so `notexample.com` does not match `example.com`.
fn matches_domain(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.trim().to_ascii_lowercase();
    if domain.is_empty() || !host.ends_with(&domain) {
        return false;
    }
    let boundary = host.len() - domain.len();
    boundary == 0 || host.as_bytes()[boundary - 1] == b'.'
}

pub(crate) fn is_private_ip(ip: &IpAddr) -> bool {
    PRIVATE_NETWORKS
        .iter()
        .any(|(network, prefix)| in_network(ip, network, *prefix))
}

fn in_network(ip: &IpAddr, network: &IpAddr, prefix: u8) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
            (u32::from(*ip) & mask) == (u32::from(*net) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
            (u128::from(*ip) & mask) == (u128::from(*net) & mask)
        }
        _ => false,
    }
}
