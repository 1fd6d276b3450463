//! Utility functions for the proxy pool.

use crate::proxy::{Proxy, ProxyScheme};

use log::debug;
use std::collections::HashSet;

/// Parse a comma- or newline-separated proxy list.
///
/// Blank entries and `#` comments are skipped, entries without a scheme get
/// `default_scheme`, and duplicates keep their first position.
pub(crate) fn parse_proxy_list(content: &str, default_scheme: ProxyScheme) -> Vec<Proxy> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match Proxy::parse(entry, default_scheme) {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                debug!("Skipping proxy list entry: {}", e);
                None
            }
        })
        .filter(|proxy| seen.insert(proxy.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_list() {
        let proxies = parse_proxy_list(" 1.1.1.1:1080,2.2.2.2:1080 , 3.3.3.3:9050\n", ProxyScheme::Socks5);
        let urls: Vec<_> = proxies.iter().map(Proxy::url).collect();
        assert_eq!(
            urls,
            vec![
                "socks5://1.1.1.1:1080",
                "socks5://2.2.2.2:1080",
                "socks5://3.3.3.3:9050"
            ]
        );
    }

    #[test]
    fn parses_newline_list_with_comments_and_schemes() {
        let content = "# free proxies\n\nhttp://4.4.4.4:8080\r\n5.5.5.5:3128\nnot-a-proxy\nftp://6.6.6.6:21\n5.5.5.5:3128\n";
        let proxies = parse_proxy_list(content, ProxyScheme::Socks5);
        let urls: Vec<_> = proxies.iter().map(Proxy::url).collect();
        assert_eq!(urls, vec!["http://4.4.4.4:8080", "socks5://5.5.5.5:3128"]);
    }

    #[test]
    fn empty_body_yields_nothing() {
        assert!(parse_proxy_list("", ProxyScheme::Socks5).is_empty());
        assert!(parse_proxy_list(" , ,\n", ProxyScheme::Socks5).is_empty());
    }
}
