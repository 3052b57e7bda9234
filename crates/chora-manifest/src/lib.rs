//! # Chora Manifest
//!
//! Build-time asset manifest and request classification for the offline
//! caching subsystem.
//!
//! Every intercepted request is classified against the manifest into one of
//! three classes which decide the retrieval strategy and target partition:
//!
//! - `StaticLocal` — same-origin app shell file, served Cache-First from the
//!   static partition.
//! - `CriticalRemote` — third-party asset the app cannot run without, served
//!   Cache-First from the offline partition.
//! - `Other` — everything else, served Network-First against the dynamic
//!   partition.
//!
//! Classification uses typed predicates (exact match, prefix match) evaluated
//! in a fixed priority order. Substring containment is deliberately not
//! supported: a dynamic URL that happens to contain a static asset's filename
//! must classify as `Other`.

use serde::{Deserialize, Serialize};
use url::Url;

/// Path of the application's root document, served as the navigation
/// fallback of last resort.
pub const ROOT_DOCUMENT: &str = "/index.html";

/// Classification of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    /// Same-origin app shell file.
    StaticLocal,
    /// Critical third-party asset, pre-cached for offline use.
    CriticalRemote,
    /// Anything else fetched at runtime.
    Other,
}

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlPattern {
    /// Exact URL match.
    Exact(String),
    /// Prefix match (covers query strings and fragments on a known URL).
    Prefix(String),
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: impl Into<String>) -> Self {
        Self::Exact(url.into())
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Check if a URL string matches this pattern.
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern.as_str()),
        }
    }
}

/// Serializable manifest definition, as written at build/deploy time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSpec {
    /// Origin the app shell is served from.
    pub origin: Url,
    /// Absolute paths of same-origin app shell files.
    pub static_local: Vec<String>,
    /// Absolute URLs of critical third-party assets.
    pub critical_remote: Vec<Url>,
}

/// Asset manifest with compiled classification predicates.
///
/// Read-only at runtime; constructed once at startup.
#[derive(Debug, Clone)]
pub struct AssetManifest {
    origin: Url,
    static_local: Vec<String>,
    critical_remote: Vec<Url>,
    remote_patterns: Vec<UrlPattern>,
}

impl AssetManifest {
    /// Create an empty manifest for the given origin.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            static_local: Vec::new(),
            critical_remote: Vec::new(),
            remote_patterns: Vec::new(),
        }
    }

    /// Add same-origin app shell paths (absolute, e.g. `/index.html`).
    pub fn with_static_local<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_local.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Add critical third-party asset URLs.
    pub fn with_critical_remote<I>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = Url>,
    {
        for url in urls {
            // A prefix predicate also matches the bare URL, so one pattern
            // per entry covers it plus any query string or fragment.
            self.remote_patterns.push(UrlPattern::prefix(url.as_str()));
            self.critical_remote.push(url);
        }
        self
    }

    /// The default Chora Planner app shell manifest.
    pub fn app_shell(origin: Url) -> Self {
        let remote = [
            "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
            "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/webfonts/fa-solid-900.woff2",
            "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/webfonts/fa-regular-400.woff2",
            "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/webfonts/fa-brands-400.woff2",
            "https://cdnjs.cloudflare.com/ajax/libs/pdf.js/2.16.105/pdf.min.js",
            "https://cdnjs.cloudflare.com/ajax/libs/pdf.js/2.16.105/pdf.worker.min.js",
            "https://cdnjs.cloudflare.com/ajax/libs/jspdf/2.5.1/jspdf.umd.min.js",
            "https://cdnjs.cloudflare.com/ajax/libs/jszip/3.10.1/jszip.min.js",
        ]
        .iter()
        .filter_map(|u| Url::parse(u).ok());

        Self::new(origin)
            .with_static_local([
                ROOT_DOCUMENT,
                "/manifest.json",
                "/icon-32.png",
                "/icon-192.png",
                "/icon-512.png",
                "/assets/css/styles.css",
                "/assets/js/app.js",
                "/assets/js/offline-manager.js",
                "/assets/js/modules/storage.js",
                "/assets/js/modules/ui.js",
                "/assets/js/modules/pdf.js",
                "/assets/js/modules/events.js",
                "/assets/js/modules/annotations.js",
                "/assets/js/modules/pwa.js",
            ])
            .with_critical_remote(remote)
    }

    /// Build a manifest from its serializable definition.
    pub fn from_spec(spec: ManifestSpec) -> Self {
        Self::new(spec.origin)
            .with_static_local(spec.static_local)
            .with_critical_remote(spec.critical_remote)
    }

    /// Classify a request URL.
    pub fn classify(&self, url: &Url) -> AssetClass {
        // A navigation to the bare origin serves the root document.
        let path = if url.path() == "/" {
            ROOT_DOCUMENT
        } else {
            url.path()
        };

        if url.origin() == self.origin.origin() && self.static_local.iter().any(|p| p == path) {
            return AssetClass::StaticLocal;
        }

        if self.remote_patterns.iter().any(|p| p.matches(url.as_str())) {
            return AssetClass::CriticalRemote;
        }

        AssetClass::Other
    }

    /// Origin the app shell is served from.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// App shell paths as declared.
    pub fn static_local(&self) -> &[String] {
        &self.static_local
    }

    /// Absolute URLs of the app shell files, resolved against the origin.
    pub fn static_urls(&self) -> Vec<Url> {
        self.static_local
            .iter()
            .filter_map(|p| self.origin.join(p).ok())
            .collect()
    }

    /// Critical third-party asset URLs.
    pub fn critical_remote(&self) -> &[Url] {
        &self.critical_remote
    }

    /// Absolute URL of the root document.
    pub fn root_document(&self) -> Url {
        self.origin
            .join(ROOT_DOCUMENT)
            .unwrap_or_else(|_| self.origin.clone())
    }

    /// The URL a same-origin request is cached and served under: the bare
    /// origin resolves to the root document (which is what install caches),
    /// everything else is returned unchanged.
    pub fn canonical_url(&self, url: &Url) -> Url {
        if url.path() == "/" && url.origin() == self.origin.origin() {
            self.root_document()
        } else {
            url.clone()
        }
    }
}
