//! Domain helpers: root-domain relation, URL hosts, social/work classification.

use serde::{Deserialize, Serialize};
use url::{Host, Url};

/// Returns the two-label root of a host (`mail.x.com` -> `x.com`).
///
/// Hosts with fewer than two labels are returned unchanged (lowercased).
pub fn root_domain(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    match labels.as_slice() {
        [.., second, top] => format!("{second}.{top}"),
        _ => host,
    }
}

/// Returns true if both hosts share the same two-label root domain.
pub fn is_related(a: &str, b: &str) -> bool {
    root_domain(a) == root_domain(b)
}

/// Extracts the host part of a URL (`https://user@docs.rs:443/x?y` -> `docs.rs`).
///
/// Returns `None` for URLs that fail to parse or have no host (e.g. `about:blank`).
pub fn host_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url.trim()).ok()?;
    let host = match url.host()? {
        Host::Domain(domain) => domain.to_ascii_lowercase(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    (!host.is_empty()).then_some(host)
}

/// Coarse category of a domain for boundary scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainCategory {
    Social,
    Work,
    Unclassified,
}

/// Classifies hosts against configured social and work domain lists.
///
/// A host matches a list entry when it equals the entry or is a subdomain of it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainClassifier {
    pub social_domains: Vec<String>,
    pub work_domains: Vec<String>,
}

impl DomainClassifier {
    /// Creates a classifier from the two domain lists.
    pub fn new(social_domains: Vec<String>, work_domains: Vec<String>) -> Self {
        Self {
            social_domains,
            work_domains,
        }
    }

    /// Classifies a host.
    pub fn classify(&self, host: &str) -> DomainCategory {
        let host = host.trim().to_ascii_lowercase();
        if matches_any(&host, &self.social_domains) {
            DomainCategory::Social
        } else if matches_any(&host, &self.work_domains) {
            DomainCategory::Work
        } else {
            DomainCategory::Unclassified
        }
    }

    /// Returns true if the pair crosses between the social and work sets.
    pub fn crosses_social_work(&self, from: &str, to: &str) -> bool {
        matches!(
            (self.classify(from), self.classify(to)),
            (DomainCategory::Social, DomainCategory::Work)
                | (DomainCategory::Work, DomainCategory::Social)
        )
    }
}

fn matches_any(host: &str, entries: &[String]) -> bool {
    entries.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        !entry.is_empty()
            && (host == entry
                || host
                    .strip_suffix(entry.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> DomainClassifier {
        DomainClassifier::new(
            vec!["social.com".to_string(), "reddit.com".to_string()],
            vec!["work.com".to_string(), "github.com".to_string()],
        )
    }

    #[test]
    fn test_root_domain() {
        assert_eq!(root_domain("mail.x.com"), "x.com");
        assert_eq!(root_domain("Docs.X.com."), "x.com");
        assert_eq!(root_domain("localhost"), "localhost");
        assert_eq!(root_domain("x.com"), "x.com");
    }

    #[test]
    fn test_is_related() {
        assert!(is_related("mail.x.com", "docs.x.com"));
        assert!(!is_related("app.work.com", "feed.social.com"));
    }

    #[test]
    fn test_host_from_url() {
        assert_eq!(
            host_from_url("https://user:pw@Docs.rs:443/tokio?x=1#y").as_deref(),
            Some("docs.rs")
        );
        assert_eq!(host_from_url("http://[::1]:8080/").as_deref(), Some("::1"));
        assert_eq!(host_from_url("about:blank"), None);
        assert_eq!(host_from_url("file:///tmp/x"), None);
    }

    #[test]
    fn test_host_from_url_follows_whatwg_rules() {
        // Backslash separates the path in special schemes.
        assert_eq!(
            host_from_url("https://docs.rs\\evil").as_deref(),
            Some("docs.rs")
        );
        assert_eq!(host_from_url("https://exa mple.com/"), None);
        assert_eq!(host_from_url("https://docs.rs:abc/"), None);
        assert_eq!(host_from_url("not a url"), None);
    }

    #[test]
    fn test_classify() {
        let c = classifier();
        assert_eq!(c.classify("feed.social.com"), DomainCategory::Social);
        assert_eq!(c.classify("app.work.com"), DomainCategory::Work);
        assert_eq!(c.classify("github.com"), DomainCategory::Work);
        assert_eq!(c.classify("notsocial.com"), DomainCategory::Unclassified);
        assert_eq!(c.classify("example.org"), DomainCategory::Unclassified);
    }

    #[test]
    fn test_crosses_social_work() {
        let c = classifier();
        assert!(c.crosses_social_work("app.work.com", "feed.social.com"));
        assert!(c.crosses_social_work("www.reddit.com", "github.com"));
        assert!(!c.crosses_social_work("github.com", "example.org"));
        assert!(!c.crosses_social_work("reddit.com", "feed.social.com"));
    }
}
