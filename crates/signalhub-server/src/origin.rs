//! Browser origin check applied before the WebSocket upgrade.

use url::Url;

/// Which `Origin` headers may open a relay connection.
///
/// Entries are `host` or `host:port` (the port is omitted when it is the
/// scheme's default). A `"*"` entry admits every origin.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    allow_any: bool,
}

impl OriginPolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: Vec<String> = allowed
            .into_iter()
            .map(|s| s.into().trim().to_ascii_lowercase())
            .collect();
        let allow_any = allowed.iter().any(|s| s == "*");
        Self { allowed, allow_any }
    }

    /// Decide on a request's `Origin` header value.
    ///
    /// Requests without an `Origin` header (non-browser clients) are allowed;
    /// an origin that does not parse as a URL is refused.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        if self.allow_any {
            return true;
        }
        let Ok(url) = Url::parse(origin) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        self.allowed.iter().any(|a| *a == host)
    }
}
