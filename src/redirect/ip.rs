//! Client address resolution for recorded clicks
//!
//! The socket peer is used unless forwarding headers are enabled. With
//! `trusted_proxies` configured, headers are honoured only when the peer is
//! one of them, and `X-Forwarded-For` is walked right to left past every
//! trusted hop.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;

use crate::config::IngestConfig;

pub fn extract_client_ip(headers: &HeaderMap, peer: IpAddr, config: &IngestConfig) -> IpAddr {
    if !config.trust_forwarded_for {
        return peer;
    }

    let proxies = &config.trusted_proxies;
    if !proxies.is_empty() && !is_trusted(peer, proxies) {
        return peer;
    }

    if let Some(ip) = from_x_forwarded_for(headers, proxies) {
        return ip;
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer)
}

fn is_trusted(ip: IpAddr, proxies: &[IpNet]) -> bool {
    proxies.iter().any(|net| net.contains(&ip))
}

fn from_x_forwarded_for(headers: &HeaderMap, proxies: &[IpNet]) -> Option<IpAddr> {
    let chain: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    if proxies.is_empty() {
        // No proxy list: trust the client-supplied first hop
        return chain.first().copied();
    }

    chain
        .iter()
        .rev()
        .find(|ip| !is_trusted(**ip, proxies))
        .or_else(|| chain.first())
        .copied()
}
