//! Site configuration consumed by the sanitizer and URL rewriter.

use serde::{Deserialize, Serialize};
use url::Url;

/// Default content container width used to resolve percentage widths.
pub const DEFAULT_CONTAINER_WIDTH: u32 = 600;

/// Static site configuration supplied by the caller before a pass runs.
///
/// `site_url` is the canonical site root (e.g. `https://example.com`);
/// `startpoint` is the path segment that marks the restricted-dialect
/// namespace (e.g. `amp`, so `https://example.com/amp/post` is the AMP
/// counterpart of `https://example.com/post`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
  pub site_url: String,
  pub startpoint: String,
  #[serde(default = "default_container_width")]
  pub container_width: u32,
}

fn default_container_width() -> u32 {
  DEFAULT_CONTAINER_WIDTH
}

impl Default for SiteConfig {
  fn default() -> Self {
    Self {
      site_url: "https://example.com".to_string(),
      startpoint: "amp".to_string(),
      container_width: DEFAULT_CONTAINER_WIDTH,
    }
  }
}

impl SiteConfig {
  pub fn new(site_url: impl Into<String>, startpoint: impl Into<String>) -> Self {
    Self {
      site_url: site_url.into().trim_end_matches('/').to_string(),
      startpoint: startpoint.into(),
      ..Self::default()
    }
  }

  /// Site root with scheme and optional `www.` prefix stripped and no
  /// trailing slash, as used by the internal-URL pattern.
  pub fn bare_domain(&self) -> String {
    let mut domain = self.site_url.as_str();
    for prefix in ["http://www.", "https://www.", "http://", "https://"] {
      if let Some(rest) = domain.strip_prefix(prefix) {
        domain = rest;
        break;
      }
    }
    domain.trim_end_matches('/').to_string()
  }

  /// Host component of the site root, if the root is a parseable URL.
  pub fn host(&self) -> Option<String> {
    Url::parse(&self.site_url)
      .ok()
      .and_then(|u| u.host_str().map(|h| h.to_string()))
  }

  /// Root-relative path joined onto the site root.
  pub fn site_path_url(&self, path: &str) -> String {
    format!("{}{}", self.site_url.trim_end_matches('/'), path)
  }

  /// Root-relative path joined onto the alternate-namespace root.
  pub fn amp_path_url(&self, path: &str) -> String {
    format!(
      "{}/{}{}",
      self.site_url.trim_end_matches('/'),
      self.startpoint,
      path
    )
  }
}

#[cfg(test)]
mod tests {
  use super::SiteConfig;

  #[test]
  fn bare_domain_strips_scheme_and_www() {
    let config = SiteConfig::new("https://www.example.com/", "amp");
    assert_eq!(config.bare_domain(), "example.com");

    let config = SiteConfig::new("http://example.org", "amp");
    assert_eq!(config.bare_domain(), "example.org");
  }

  #[test]
  fn namespace_urls_join_paths() {
    let config = SiteConfig::new("https://example.com", "amp");
    assert_eq!(config.site_path_url("/blog/post"), "https://example.com/blog/post");
    assert_eq!(config.amp_path_url("/blog/post"), "https://example.com/amp/blog/post");
    assert_eq!(config.amp_path_url("/"), "https://example.com/amp/");
  }
}
