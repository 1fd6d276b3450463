//! Proxy addresses and transport schemes.

use crate::error::InvalidProxy;

use std::fmt;
use std::str::FromStr;
use url::Url;

/// Transport used to reach a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProxyScheme {
    /// SOCKS5 tunnel.
    Socks5,
    /// HTTP forward proxy (CONNECT for https targets).
    Http,
}

impl ProxyScheme {
    /// URL scheme prefix, without `://`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Http => "http",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "socks5" => Some(ProxyScheme::Socks5),
            "http" => Some(ProxyScheme::Http),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque proxy address.
///
/// Identity is the normalized URL string (`scheme://host:port`). A `Proxy` is
/// never mutated: the pool only adds, removes and rescores them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Proxy {
    url: String,
    scheme: ProxyScheme,
}

impl Proxy {
    /// Parse a raw list entry, applying `default_scheme` when none is present.
    ///
    /// Surrounding whitespace is ignored. SOCKS5 entries need an explicit port;
    /// HTTP entries fall back to port 80. Entries carrying `user:pass@` are
    /// rejected rather than used without their credentials.
    pub fn parse(raw: &str, default_scheme: ProxyScheme) -> Result<Self, InvalidProxy> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(InvalidProxy::new(raw, "empty address"));
        }

        let (scheme, rest) = match raw.split_once("://") {
            Some((prefix, rest)) => {
                let scheme = ProxyScheme::from_prefix(prefix)
                    .ok_or_else(|| InvalidProxy::new(raw, "unsupported scheme"))?;
                (scheme, rest)
            }
            None => (default_scheme, raw),
        };

        let parsed = Url::parse(&format!("{}://{}", scheme, rest))
            .map_err(|e| InvalidProxy::new(raw, e.to_string()))?;
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(InvalidProxy::new(raw, "authenticated proxies are not supported"));
        }
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| InvalidProxy::new(raw, "missing host"))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| InvalidProxy::new(raw, "missing port"))?;

        Ok(Self {
            url: format!("{}://{}:{}", scheme, host, port),
            scheme,
        })
    }

    /// The normalized address, e.g. `socks5://127.0.0.1:1080`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The transport scheme.
    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    /// `host:port` without the scheme prefix.
    pub fn address(&self) -> &str {
        &self.url[self.scheme.as_str().len() + 3..]
    }

    /// Convert the proxy URL to a reqwest::Proxy.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(&self.url)
    }
}

impl FromStr for Proxy {
    type Err = InvalidProxy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Proxy::parse(s, ProxyScheme::Socks5)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
