//! Protocol-link intake
//!
//! Links take one of these forms:
//!
//! - `hostlink://sync.example.com:2222/...` opens the host with that address
//! - `hostlink://open?host=Work` opens the host with that address or title
//! - `hostlink://` opens the default host
//!
//! Anything with a different scheme, or that does not parse as a URL, is
//! ignored rather than reported.

use reqwest::Url;

use crate::types::HostRef;

/// Authority that means "no host in the authority, read the query"
const OPEN_ACTION: &str = "open";

/// Query parameter carrying a host reference
const HOST_PARAM: &str = "host";

/// A decoded protocol link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    /// Host to open; `None` opens the default host
    pub host: Option<HostRef>,
}

/// Decode `url` if it uses `protocol` as its scheme
pub fn parse_link(url: &str, protocol: &str) -> Option<LinkTarget> {
    let parsed = match Url::parse(url.trim()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("Ignoring malformed link {:?}: {}", url, e);
            return None;
        }
    };

    if !parsed.scheme().eq_ignore_ascii_case(protocol) {
        tracing::debug!(
            "Ignoring link with scheme {:?} (expected {:?})",
            parsed.scheme(),
            protocol
        );
        return None;
    }

    let from_query = parsed
        .query_pairs()
        .find(|(key, _)| key == HOST_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let from_authority = parsed
        .host_str()
        .filter(|h| !h.is_empty() && !h.eq_ignore_ascii_case(OPEN_ACTION))
        .map(|h| match parsed.port() {
            Some(port) => format!("{}:{}", h, port),
            None => h.to_string(),
        });

    Some(LinkTarget {
        host: from_query.or(from_authority).map(HostRef::new),
    })
}

/// First command-line argument that carries a `protocol` link
pub fn find_link_arg<'a, I>(args: I, protocol: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = format!("{}:", protocol.to_lowercase());
    args.into_iter()
        .find(|arg| arg.trim().to_lowercase().starts_with(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_in_authority() {
        let target = parse_link("hostlink://sync.example.com:2222/some/path", "hostlink").unwrap();
        assert_eq!(target.host, Some(HostRef::from("sync.example.com:2222")));
    }

    #[test]
    fn test_host_in_query_is_decoded() {
        let target = parse_link("hostlink://open?host=My%20Work", "hostlink").unwrap();
        assert_eq!(target.host, Some(HostRef::from("My Work")));
    }

    #[test]
    fn test_bare_link_opens_default() {
        assert_eq!(
            parse_link("hostlink://open", "hostlink"),
            Some(LinkTarget { host: None })
        );
        assert_eq!(
            parse_link("hostlink://", "hostlink"),
            Some(LinkTarget { host: None })
        );
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        assert!(parse_link("HostLink://a.example", "hostlink").is_some());
    }

    #[test]
    fn test_mismatched_scheme_is_ignored() {
        assert_eq!(parse_link("https://a.example", "hostlink"), None);
        assert_eq!(parse_link("sturdy://a.example", "hostlink"), None);
    }

    #[test]
    fn test_malformed_is_ignored() {
        assert_eq!(parse_link("not a url", "hostlink"), None);
        assert_eq!(parse_link("", "hostlink"), None);
    }

    #[test]
    fn test_find_link_arg() {
        let args = ["/usr/bin/hostlink", "--flag", "hostlink://open?host=a", "hostlink://b"];
        assert_eq!(
            find_link_arg(args.iter().copied(), "hostlink"),
            Some("hostlink://open?host=a")
        );
        assert_eq!(find_link_arg(["--flag"].iter().copied(), "hostlink"), None);
    }
}
