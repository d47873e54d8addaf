//! The trusted-source allow-list.

use super::digest::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_DOMAINS: [(&str, &[DigestAlgorithm]); 4] = [
    (
        "github.com",
        &[DigestAlgorithm::Sha256, DigestAlgorithm::Sha512],
    ),
    ("npmjs.org", &[DigestAlgorithm::Sha256]),
    ("pypi.org", &[DigestAlgorithm::Sha256]),
    ("ffmpeg.org", &[DigestAlgorithm::Sha256]),
];

/// A domain pre-approved to supply artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedSource {
    /// Hostname; subdomains are trusted too.
    pub domain: String,
    /// Public keys associated with the source.
    #[serde(default)]
    pub public_keys: Vec<String>,
    /// Digest algorithms the source publishes.
    #[serde(default)]
    pub algorithms: Vec<DigestAlgorithm>,
    /// Disabled entries never match.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

const fn enabled_by_default() -> bool {
    true
}

impl TrustedSource {
    /// An enabled source with no keys.
    #[must_use]
    pub fn new(domain: &str, algorithms: &[DigestAlgorithm]) -> Self {
        Self {
            domain: domain.to_ascii_lowercase(),
            public_keys: Vec::new(),
            algorithms: algorithms.to_vec(),
            enabled: true,
        }
    }

    fn covers(&self, host: &str) -> bool {
        host == self.domain
            || host
                .strip_suffix(self.domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// Allow-list keyed by domain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrustedSources {
    entries: BTreeMap<String, TrustedSource>,
}

impl TrustedSources {
    /// The built-in allow-list.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut sources = Self::default();
        for (domain, algorithms) in DEFAULT_DOMAINS {
            sources.add(TrustedSource::new(domain, algorithms));
        }
        sources
    }

    /// Insert or replace the entry for `source.domain`.
    pub fn add(&mut self, source: TrustedSource) {
        log::debug!("trusting source {}", source.domain);
        self.entries.insert(source.domain.to_ascii_lowercase(), source);
    }

    /// Remove `domain`, returning the removed entry.
    pub fn remove(&mut self, domain: &str) -> Option<TrustedSource> {
        self.entries.remove(&domain.to_ascii_lowercase())
    }

    /// Enable or disable `domain`. Returns `false` if it is unknown.
    pub fn set_enabled(&mut self, domain: &str, enabled: bool) -> bool {
        match self.entries.get_mut(&domain.to_ascii_lowercase()) {
            Some(source) => {
                source.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Report whether `host` is an enabled domain or one of its subdomains.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadeps_provisioner::security::TrustedSources;
    ///
    /// let sources = TrustedSources::with_defaults();
    /// assert!(sources.contains("objects.github.com"));
    /// assert!(!sources.contains("github.com.evil.org"));
    /// ```
    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.entries
            .values()
            .any(|source| source.enabled && source.covers(&host))
    }

    /// Report whether the host of `url` is trusted.
    ///
    /// Unparseable URLs and URLs without a host are untrusted.
    #[must_use]
    pub fn is_trusted_url(&self, url: &str) -> bool {
        match url::Url::parse(url) {
            Ok(parsed) => parsed.host_str().is_some_and(|host| self.contains(host)),
            Err(err) => {
                log::debug!("source {url} is not a valid URL: {err}");
                false
            }
        }
    }

    /// Number of entries, enabled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Report whether the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in domain order.
    pub fn iter(&self) -> impl Iterator<Item = &TrustedSource> {
        self.entries.values()
    }

    /// Snapshot keyed by domain.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, TrustedSource> {
        self.entries.clone()
    }

    /// Replace every entry.
    pub fn replace_all(&mut self, entries: BTreeMap<String, TrustedSource>) {
        self.entries = entries
            .into_iter()
            .map(|(domain, source)| (domain.to_ascii_lowercase(), source))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp", true)]
    #[case("https://objects.githubusercontent.com/x", false)]
    #[case("https://release-assets.github.com/x", true)]
    #[case("https://GitHub.com/x", true)]
    #[case("https://evilgithub.com/x", false)]
    #[case("https://github.com.evil.org/x", false)]
    #[case("https://johnvansickle.com/ffmpeg/releases/x.tar.xz", false)]
    #[case("https://www.ffmpeg.org/download", true)]
    #[case("not a url", false)]
    fn classifies_urls(#[case] url: &str, #[case] trusted: bool) {
        assert_eq!(TrustedSources::with_defaults().is_trusted_url(url), trusted);
    }

    #[test]
    fn defaults_cover_four_domains() {
        let sources = TrustedSources::with_defaults();
        assert_eq!(sources.len(), 4);
        let domains: Vec<_> = sources.iter().map(|s| s.domain.as_str()).collect();
        assert_eq!(domains, ["ffmpeg.org", "github.com", "npmjs.org", "pypi.org"]);
    }

    #[test]
    fn disabled_sources_never_match() {
        let mut sources = TrustedSources::with_defaults();
        assert!(sources.set_enabled("github.com", false));
        assert!(!sources.contains("github.com"));
        assert!(!sources.set_enabled("example.org", false));
    }

    #[test]
    fn add_and_remove_change_membership() {
        let mut sources = TrustedSources::default();
        assert!(!sources.contains("evermeet.cx"));
        sources.add(TrustedSource::new("evermeet.cx", &[DigestAlgorithm::Sha256]));
        assert!(sources.contains("evermeet.cx"));
        assert!(sources.remove("EVERMEET.CX").is_some());
        assert!(sources.is_empty());
    }
}
