//! HTTP proxy selection and CONNECT tunnelling.

use std::net::IpAddr;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;

const MAX_RESPONSE_HEADER: usize = 8 * 1024;

/// An HTTP proxy to tunnel through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Base64 `user:password` for `Proxy-Authorization`, if the URL had credentials.
    pub credentials: Option<String>,
}

/// Resolves the proxy for `target` from the process environment.
pub fn proxy_for_url(target: &Url) -> Option<ProxyTarget> {
    proxy_for_url_with(target, |name| std::env::var(name).ok())
}

/// Resolves the proxy for `target` using `lookup` to read variables.
pub fn proxy_for_url_with(
    target: &Url,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<ProxyTarget> {
    let host = target.host_str()?;
    if is_loopback(host) {
        return None;
    }
    let no_proxy = lookup("NO_PROXY").or_else(|| lookup("no_proxy"));
    if no_proxy.is_some_and(|list| bypasses(&list, host)) {
        debug!(host = %host, "Proxy bypassed by NO_PROXY");
        return None;
    }

    let scheme_vars: [&str; 2] = match target.scheme() {
        "wss" | "https" => ["HTTPS_PROXY", "https_proxy"],
        _ => ["HTTP_PROXY", "http_proxy"],
    };
    let raw = scheme_vars
        .iter()
        .chain(["ALL_PROXY", "all_proxy"].iter())
        .find_map(|name| lookup(name).filter(|value| !value.trim().is_empty()))?;

    match parse_proxy(&raw) {
        Ok(proxy) => Some(proxy),
        Err(e) => {
            warn!(proxy = %raw, error = %e, "Ignoring proxy setting");
            None
        }
    }
}

/// Parses a proxy setting. A bare `host:port` is taken as `http://`; any
/// other explicit scheme is rejected.
pub fn parse_proxy(raw: &str) -> Result<ProxyTarget, Error> {
    let raw = raw.trim();
    let url = if raw.contains("://") {
        Url::parse(raw)?
    } else {
        Url::parse(&format!("http://{raw}"))?
    };
    if url.scheme() != "http" {
        return Err(Error::Proxy(format!(
            "unsupported proxy scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::Proxy("proxy URL has no host".to_string()))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let credentials = (!url.username().is_empty()).then(|| {
        let pair = format!("{}:{}", url.username(), url.password().unwrap_or(""));
        base64::engine::general_purpose::STANDARD.encode(pair)
    });

    Ok(ProxyTarget {
        host,
        port,
        credentials,
    })
}

fn is_loopback(host: &str) -> bool {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    bare.eq_ignore_ascii_case("localhost")
        || bare.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn bypasses(no_proxy: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    no_proxy
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            let entry = entry.split(':').next().unwrap_or(entry);
            let entry = entry.trim_start_matches('.').to_ascii_lowercase();
            host == entry || host.ends_with(&format!(".{entry}"))
        })
}

/// Opens a TCP connection to `host:port` through the proxy's CONNECT method.
pub async fn tunnel(proxy: &ProxyTarget, host: &str, port: u16) -> Result<TcpStream, Error> {
    debug!(proxy_host = %proxy.host, proxy_port = proxy.port, host = %host, "Opening proxy tunnel");
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;

    let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if let Some(credentials) = &proxy.credentials {
        request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    // Read byte by byte so nothing past the response header is consumed.
    let mut response = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Err(Error::Proxy("proxy closed the connection".to_string()));
        }
        response.push(byte[0]);
        if response.len() > MAX_RESPONSE_HEADER {
            return Err(Error::Proxy("proxy response header too large".to_string()));
        }
    }

    let response = String::from_utf8_lossy(&response);
    let status_line = response.lines().next().unwrap_or_default();
    match status_line.split_whitespace().nth(1) {
        Some(code) if code.starts_with('2') => Ok(stream),
        _ => Err(Error::Proxy(format!("CONNECT refused: {status_line}"))),
    }
}
