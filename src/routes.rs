//! Path-prefix classification for proxied routes.

/// Prefixes owned by the admin backend: panel pages, framework and
/// live-update assets, published vendor assets and the liveness check.
pub const ADMIN_PREFIXES: &[&str] = &[
    "/admin",
    "/livewire",
    "/filament",
    "/css/filament",
    "/js/filament",
    "/fonts/filament",
    "/vendor",
    "/up",
];

/// Ordered prefix list; the first matching prefix wins.
#[derive(Debug, Clone)]
pub struct RouteRules {
    prefixes: Vec<String>,
}

impl Default for RouteRules {
    fn default() -> Self {
        Self::new(ADMIN_PREFIXES.iter().copied())
    }
}

impl RouteRules {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.into().trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    /// Returns the prefix that selects the proxy for `path`, if any.
    ///
    /// `/admin` matches `/admin` and `/admin/users` but not `/administrator`.
    pub fn matching(&self, path: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|prefix| match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            })
            .map(String::as_str)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matching(path).is_some()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }
}
