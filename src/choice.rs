use anyhow::Result;
use tracing::{debug, info};
use url::Url;

use crate::preferences::{KEY_KEEP_ASKING, PreferenceStore};

/// Host (plus explicit port) of `url`; empty for unparseable or host-less input.
pub fn domain_of(url: &str) -> String {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return String::new();
    };
    match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

/// Whether the candidate `(browser_id, profile)` is the saved choice for `url`'s
/// domain and no keep-asking override is set.
pub fn should_auto_launch(
    store: &PreferenceStore,
    url: &str,
    browser_id: &str,
    profile: Option<&str>,
) -> bool {
    let Some(entry) = store.resolve(&domain_of(url)) else {
        return false;
    };
    if entry.keep_asking {
        return false;
    }
    entry.profile.as_deref() == profile && entry.browser_id.as_deref() == Some(browser_id)
}

/// Replace the first occurrence of the domain in `url` with its `redirect` target.
pub fn rewrite_url(store: &PreferenceStore, url: &str) -> String {
    let domain = domain_of(url);
    if domain.is_empty() {
        return url.to_string();
    }
    let Some(redirect) = store.resolve(&domain).and_then(|entry| entry.redirect) else {
        return url.to_string();
    };
    debug!(%domain, %redirect, "rewriting URL");
    // The parser lowercases hosts; match the URL text case-insensitively.
    match url.to_ascii_lowercase().find(&domain) {
        Some(start) => {
            let end = start + domain.len();
            format!("{}{}{}", &url[..start], redirect, &url[end..])
        }
        // Internationalised hosts only appear in punycode after parsing.
        None => replace_host(url, &redirect).unwrap_or_else(|| url.to_string()),
    }
}

fn replace_host(url: &str, redirect: &str) -> Option<String> {
    let mut parsed = Url::parse(url.trim()).ok()?;
    let with_port = redirect
        .rsplit_once(':')
        .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)));
    let (host, port) = match with_port {
        Some((host, port)) => (host, Some(port)),
        None => (redirect, None),
    };
    parsed.set_host(Some(host)).ok()?;
    if port.is_some() {
        parsed.set_port(port).ok()?;
    }
    Some(parsed.into())
}

/// Persist the outcome of a launcher activation.
pub fn record_choice(
    store: &mut PreferenceStore,
    url: &str,
    browser_id: &str,
    profile: Option<&str>,
    remember: bool,
) -> Result<()> {
    let domain = domain_of(url);
    if domain.is_empty() {
        debug!("no domain to remember the choice for");
        return Ok(());
    }
    if remember {
        info!(%domain, browser = browser_id, profile = ?profile, "remembering choice");
        store.set_choice(&domain, browser_id, profile)
    } else {
        store.set_keep_asking(&domain)
    }
}

/// Initial "Once"/"Always" state: remember only when a URL was supplied and its
/// domain is not marked keep-asking.
pub fn session_default_remember(store: &PreferenceStore, url: Option<&str>) -> bool {
    match url {
        Some(url) => !store
            .get_value(&domain_of(url), KEY_KEEP_ASKING, "false")
            .trim()
            .eq_ignore_ascii_case("true"),
        None => false,
    }
}
