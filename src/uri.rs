//! Minimal URI handling: scheme/host/port parsing and `TcpGroup`/`HttpConf`
//! derivation for the single target CLI convenience path.
//!
//! Grounded on the teacher crate's `connect.rs` address resolution helpers
//! (`scheme_to_port`, host/port splitting) but simplified: this generator
//! always dials one fixed `dst` per group rather than keying connections by
//! per-request authority.

use crate::config::{HttpConf, TcpGroup};
use crate::error::{Error, Result};
use std::collections::HashMap;

pub struct ParsedUrl {
    pub is_https: bool,
    pub host: String,
    pub port: u16,
    pub path_and_query: String,
}

pub fn parse_url(url: &str) -> Result<ParsedUrl> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| Error::InvalidUri(format!("missing scheme in {url}")))?;
    let is_https = match scheme {
        "http" => false,
        "https" => true,
        other => return Err(Error::InvalidUri(format!("unsupported scheme {other}"))),
    };

    let (authority, path_and_query) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) if !h.is_empty() => {
            let port: u16 = p
                .parse()
                .map_err(|_| Error::InvalidUri(format!("invalid port in {url}")))?;
            (h.to_string(), port)
        }
        _ => (authority.to_string(), if is_https { 443 } else { 80 }),
    };

    if host.is_empty() {
        return Err(Error::InvalidUri(format!("missing host in {url}")));
    }

    Ok(ParsedUrl {
        is_https,
        host,
        port,
        path_and_query: if path_and_query.is_empty() {
            "/".to_string()
        } else {
            path_and_query.to_string()
        },
    })
}

impl ParsedUrl {
    pub fn dst(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Derive a `Host` header value from a `host:port` dial target, omitting the
/// port when it's the scheme's default (80 for http, 443 for https).
pub fn host_header_from_dst(dst: &str, is_https: bool) -> String {
    match dst.rsplit_once(':') {
        Some((host, port)) => {
            let default_port = if is_https { "443" } else { "80" };
            if port == default_port {
                host.to_string()
            } else {
                dst.to_string()
            }
        }
        None => dst.to_string(),
    }
}

/// Insert a `Host` header derived from `dst`/`is_https` into `headers`,
/// unless the caller already supplied one (case insensitive).
pub fn ensure_host_header(headers: &mut HashMap<String, String>, dst: &str, is_https: bool) {
    if headers.keys().any(|k| k.eq_ignore_ascii_case("host")) {
        return;
    }
    headers.insert("Host".to_string(), host_header_from_dst(dst, is_https));
}

/// Build the synthesized single group + single template run, matching the
/// defaults the `-u/-c/-t/...` CLI convenience path used in the original.
pub fn derive_single_target(
    url: &str,
    method: &str,
    body: &str,
    headers: HashMap<String, String>,
    req_thread: usize,
    max_qps: u32,
    max_request: u64,
) -> Result<(TcpGroup, HttpConf)> {
    let parsed = parse_url(url)?;
    let mut headers = headers;
    ensure_host_header(&mut headers, &parsed.dst(), parsed.is_https);
    let http_conf = HttpConf {
        name: "cli".to_string(),
        proto: "HTTP/1.1".to_string(),
        method: method.to_string(),
        uri: parsed.path_and_query.clone(),
        body: body.to_string(),
        header: headers,
        use_params: Vec::new(),
        upload_file: None,
    };
    let group = TcpGroup {
        name: "cli".to_string(),
        max_tcp_conn_per_ip: req_thread,
        tcp_conn_thread: 1000,
        tcp_creat_thread: 10,
        tcp_creat_rate: 10_000,
        src_ip: Vec::new(),
        max_qps,
        dst: parsed.dst(),
        req_thread,
        max_request,
        is_https: parsed.is_https,
        send_http: vec!["cli".to_string()],
    };
    Ok((group, http_conf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_http_url() {
        let u = parse_url("http://example.com/a/b?c=1").unwrap();
        assert!(!u.is_https);
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, 80);
        assert_eq!(u.path_and_query, "/a/b?c=1");
    }

    #[test]
    fn parses_https_with_explicit_port() {
        let u = parse_url("https://example.com:8443/").unwrap();
        assert!(u.is_https);
        assert_eq!(u.port, 8443);
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(parse_url("example.com/a").is_err());
    }

    #[test]
    fn defaults_path_to_root() {
        let u = parse_url("http://example.com").unwrap();
        assert_eq!(u.path_and_query, "/");
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(host_header_from_dst("example.com:80", false), "example.com");
        assert_eq!(host_header_from_dst("example.com:443", true), "example.com");
    }

    #[test]
    fn host_header_keeps_nonstandard_port() {
        assert_eq!(host_header_from_dst("example.com:8443", true), "example.com:8443");
    }

    #[test]
    fn ensure_host_header_does_not_override_user_value() {
        let mut headers = HashMap::new();
        headers.insert("HOST".to_string(), "custom.example".to_string());
        ensure_host_header(&mut headers, "example.com:80", false);
        assert_eq!(headers.get("HOST").unwrap(), "custom.example");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn derive_single_target_injects_host() {
        let (group, conf) =
            derive_single_target("http://example.com/a", "GET", "", HashMap::new(), 1, 0, 100).unwrap();
        assert_eq!(group.dst, "example.com:80");
        let host = conf.header.iter().find(|(k, _)| k.eq_ignore_ascii_case("host")).unwrap().1;
        assert_eq!(host, "example.com");
    }
}
