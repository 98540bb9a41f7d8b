//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::Request};

/// Extract the client IP address.
///
/// With `trust_proxy`, the first address of `X-Forwarded-For` is used and a
/// missing header is an error (no fallback to the proxy's own address).
/// Otherwise the socket address from `ConnectInfo` is used.
pub fn extract_client_ip<B>(
    source: &Request<B>,
    trust_proxy: bool,
) -> Result<String, &'static str> {
    if trust_proxy {
        let value = source
            .headers()
            .get("x-forwarded-for")
            .ok_or("IP header not present")?
            .to_str()
            .map_err(|_| "IP header contains invalid characters")?;
        let first = value.split(',').next().unwrap_or("").trim();
        if first.is_empty() {
            return Err("IP header is empty");
        }
        return Ok(first.to_string());
    }

    source
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .ok_or("No client IP available")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_forwarded_for_first_hop() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 192.168.1.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request, true).unwrap(), "10.0.0.1");
    }

    #[test]
    fn test_forwarded_for_required_when_trusted() {
        let request = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert!(extract_client_ip(&request, true).is_err());
    }

    #[test]
    fn test_connect_info() {
        let mut request = axum::http::Request::builder()
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        // Header ignored when the proxy is not trusted
        assert_eq!(extract_client_ip(&request, false).unwrap(), "127.0.0.1");
    }
}
