//! Redirect target validation and `Location` construction.

use http::Uri;
use url::Url;

/// Accepts either a URL with a host (`https://example.com/x`) or a bare
/// `host:port` pair. Every create/update path checks this before touching the store.
pub fn is_valid(target: &str) -> bool {
    if target.is_empty() {
        return false;
    }

    if target.contains("://") {
        return Url::parse(target)
            .map(|url| url.host_str().is_some_and(|host| !host.is_empty()))
            .unwrap_or(false);
    }

    let mut parts = target.split(':');
    matches!(
        (parts.next(), parts.next()),
        (Some(host), Some(port)) if !host.is_empty() && !port.is_empty()
    )
}

/// `Location` for a `/go/<name>` redirect: the target itself, with `http://`
/// added when it carries no http(s) scheme.
pub fn path_location(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{target}")
    }
}

/// `Location` for a domain redirect: the target's scheme, host and port with the
/// request's path and query. Anything after the authority in the target is
/// replaced.
pub fn domain_location(target: &str, request: &Uri) -> Result<String, url::ParseError> {
    let mut url = if target.contains("://") {
        Url::parse(target)?
    } else {
        Url::parse(&format!("http://{target}"))?
    };

    url.set_path(request.path());
    url.set_query(request.query());
    // Fragments are never sent by clients, so the request cannot carry one.
    url.set_fragment(None);
    Ok(url.into())
}
