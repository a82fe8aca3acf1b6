//! Client metadata pulled from request headers

use axum::http::{header, HeaderMap};
use medauth_core::ClientContext;
use std::net::IpAddr;

/// Header carrying a client-chosen stable device identifier
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Client IP from proxy headers, as recorded on sessions and tokens.
///
/// Takes the first entry of `X-Forwarded-For`, then `X-Real-IP`. Returns
/// `None` when neither is present. The value is client-supplied, so it must
/// not key anything security relevant; see [`resolve_client_ip`].
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Address a request is accounted to.
///
/// The socket `peer` is used as is unless it is one of `trusted_proxies`.
/// Behind a trusted proxy, `X-Forwarded-For` is walked right to left past
/// the trusted hops, so entries a client prepends are never reached. Without
/// a peer nothing can be trusted and `None` is returned.
pub fn resolve_client_ip(
    peer: Option<IpAddr>,
    headers: &HeaderMap,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let peer = peer?;
    if !trusted_proxies.contains(&peer) {
        return Some(peer);
    }

    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect::<Vec<_>>();
    if !forwarded.is_empty() {
        let mut client = peer;
        for hop in forwarded.iter().rev() {
            let Ok(ip) = hop.parse::<IpAddr>() else {
                break;
            };
            client = ip;
            if !trusted_proxies.contains(&ip) {
                break;
            }
        }
        return Some(client);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(Some(peer))
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Everything a session or one-time token records about the caller
pub fn client_context(headers: &HeaderMap) -> ClientContext {
    ClientContext {
        ip_address: extract_ip_address(headers),
        user_agent: extract_user_agent(headers),
        device_id: headers
            .get(DEVICE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string),
    }
}
