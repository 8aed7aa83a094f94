//! Minimal User-Agent classification into the family names the catalog uses.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub name: &'static str,
    pub version: String,
}

impl Agent {
    fn new(name: &'static str, version: impl Into<String>) -> Self {
        Self {
            name,
            version: version.into(),
        }
    }
}

/// Browsers whose product token is checked before the generic engines they embed.
/// Order matters: Edge and the Chinese Chromium forks also advertise `Chrome/`.
const PRODUCT_TOKENS: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("EdgA/", "Edge"),
    ("EdgiOS/", "Edge"),
    ("Edge/", "Edge"),
    ("QQBrowser/", "QQBrowser"),
    ("QihooBrowser/", "360Browser"),
    ("OPR/", "Opera"),
    ("Opera/", "Opera"),
    ("Firefox/", "Firefox"),
    ("FxiOS/", "Firefox"),
];

/// Classifies a User-Agent header. Returns `None` for anything not browser shaped.
pub fn parse(ua: &str) -> Option<Agent> {
    for (token, name) in PRODUCT_TOKENS {
        if let Some(version) = token_version(ua, token) {
            return Some(Agent::new(name, version));
        }
    }

    // 360 only marks itself with a bare tag and otherwise looks like Chrome.
    if ua.contains("360SE") || ua.contains("360EE") || ua.contains("QHBrowser") {
        let version = token_version(ua, "Chrome/").unwrap_or_default();
        return Some(Agent::new("360Browser", version));
    }

    if let Some(version) = token_version(ua, "CriOS/").or_else(|| token_version(ua, "Chrome/")) {
        return Some(Agent::new("Chrome", version));
    }

    if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        if ua.contains("Safari/") || ua.contains("Mobile/") {
            let version = ios_version(ua).unwrap_or_default();
            return Some(Agent::new("iOS", version));
        }
    }

    if let Some(version) = prefixed_version(ua, "Android ") {
        if ua.contains("Version/") || ua.contains("okhttp") {
            return Some(Agent::new("Android", version));
        }
    }

    if ua.contains("Safari/") {
        if let Some(version) = token_version(ua, "Version/") {
            return Some(Agent::new("Safari", version));
        }
    }

    if let Some(version) = prefixed_version(ua, "MSIE ") {
        return Some(Agent::new("Internet Explorer", version));
    }
    if ua.contains("Trident/") {
        let version = token_version(ua, "rv:").unwrap_or_default();
        return Some(Agent::new("Internet Explorer", version));
    }

    None
}

/// Text following `token` up to the next separator.
fn token_version(ua: &str, token: &str) -> Option<String> {
    let start = ua.find(token)? + token.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && !matches!(c, ';' | ')' | '('))
        .collect();
    Some(version)
}

/// Dotted numeric version directly after `prefix`, e.g. `Android 11`.
fn prefixed_version(ua: &str, prefix: &str) -> Option<String> {
    let start = ua.find(prefix)? + prefix.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Some(version)
}

/// `CPU iPhone OS 14_2 like Mac OS X` -> `14.2`
fn ios_version(ua: &str) -> Option<String> {
    let start = ["iPhone OS ", "CPU OS "]
        .iter()
        .find_map(|marker| ua.find(marker).map(|i| i + marker.len()))?;
    let version: String = ua[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '_' || *c == '.')
        .map(|c| if c == '_' { '.' } else { c })
        .collect();
    Some(version)
}
