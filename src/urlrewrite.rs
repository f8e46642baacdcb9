//! URL classification and rewriting between the canonical site namespace
//! and the restricted-dialect ("AMP") namespace.
//!
//! A URL is internal when it matches the site root's bare domain (with an
//! optional `www.` segment). Internal URLs are rewritten by inserting or
//! stripping the alternate-namespace marker as the first path segment;
//! `wp-content` paths are static assets and are never rewritten.

use crate::config::SiteConfig;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Lenient URL decomposition: relative references and scheme-relative
/// references still yield a usable path instead of a parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LooseUrl {
  pub scheme: Option<String>,
  pub host: Option<String>,
  pub path: String,
}

/// Decompose a URL without rejecting relative references.
pub fn parse_loose(raw: &str) -> LooseUrl {
  let raw = raw.trim();

  if let Ok(parsed) = Url::parse(raw) {
    return LooseUrl {
      scheme: Some(parsed.scheme().to_string()),
      host: parsed.host_str().map(|h| h.to_string()),
      path: parsed.path().to_string(),
    };
  }

  // Scheme-relative: //host/path
  if let Some(rest) = raw.strip_prefix("//") {
    let (host, path) = match rest.find('/') {
      Some(idx) => (&rest[..idx], &rest[idx..]),
      None => (rest, ""),
    };
    return LooseUrl {
      scheme: None,
      host: Some(host.to_string()).filter(|h| !h.is_empty()),
      path: strip_query_fragment(path).to_string(),
    };
  }

  LooseUrl {
    scheme: None,
    host: None,
    path: strip_query_fragment(raw).to_string(),
  }
}

fn strip_query_fragment(path: &str) -> &str {
  let end = path.find(['?', '#']).unwrap_or(path.len());
  &path[..end]
}

/// Rewrites URLs between the two site namespaces.
///
/// The enable flag gates rewrites toward the alternate namespace; callers
/// toggle it around regions that must keep canonical links and restore the
/// returned previous value afterwards.
pub struct UrlRewriter {
  config: SiteConfig,
  internal: Regex,
  enabled: bool,
}

impl UrlRewriter {
  pub fn new(config: &SiteConfig) -> Self {
    let domain = config.bare_domain();
    let pattern = format!("^https?://w*\\.?{}/?([^/]*)/?(.*?)$", regex::escape(&domain));
    Self {
      config: config.clone(),
      internal: Regex::new(&pattern).expect("internal URL pattern is valid"),
      enabled: true,
    }
  }

  /// Toggle rewriting, returning the previous state so callers can nest
  /// save/restore regions.
  pub fn set_enabled(&mut self, enabled: bool) -> bool {
    std::mem::replace(&mut self.enabled, enabled)
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Whether the URL points into the configured site.
  pub fn is_internal(&self, url: &str) -> bool {
    self.internal.is_match(url)
  }

  /// Rewrite an internal URL into the alternate namespace. Non-internal
  /// URLs, `wp-content` asset paths, URLs already in the alternate
  /// namespace, and everything while disabled pass through unchanged.
  pub fn to_amp_url(&self, url: &str) -> String {
    if !self.enabled {
      return url.to_string();
    }

    if let Some(caps) = self.internal.captures(url) {
      let first = caps.get(1).map_or("", |m| m.as_str());
      if first != self.config.startpoint && first != "wp-content" {
        let path = if first.is_empty() {
          "/".to_string()
        } else {
          format!("/{}/{}", first, caps.get(2).map_or("", |m| m.as_str()))
        };
        return self.config.amp_path_url(&path);
      }
    }

    url.to_string()
  }

  /// Rewrite an alternate-namespace URL back to its canonical form. Only
  /// URLs whose first path segment is the namespace marker are touched.
  pub fn to_canonical_url(&self, url: &str) -> String {
    if let Some(caps) = self.internal.captures(url) {
      let first = caps.get(1).map_or("", |m| m.as_str());
      if !first.is_empty() && first == self.config.startpoint {
        let path = format!("/{}", caps.get(2).map_or("", |m| m.as_str()));
        return self.config.site_path_url(&path);
      }
    }

    url.to_string()
  }

  /// Decompose `url` if it is internal (no host, or the site root's host).
  pub fn parse_internal_url(&self, url: &str) -> Option<LooseUrl> {
    let parsed = parse_loose(url);
    match (&parsed.host, self.config.host()) {
      (None, _) => Some(parsed),
      (Some(host), Some(site_host)) if *host == site_host => Some(parsed),
      _ => None,
    }
  }

  /// Rewrite every anchor `href` in raw markup through [`Self::to_amp_url`].
  ///
  /// The scanner tolerates single-quoted, double-quoted, and unquoted
  /// values; rewritten values are attribute-escaped before reinsertion.
  pub fn rewrite_anchor_hrefs(&self, html: &str) -> String {
    static HREF: OnceLock<Regex> = OnceLock::new();
    let href = HREF.get_or_init(|| {
      Regex::new(r#"(?is)<\s*a\s(.*?)href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("href pattern is valid")
    });

    href
      .replace_all(html, |caps: &regex::Captures| {
        let atts = caps.get(1).map_or("", |m| m.as_str());
        let (quote, value) = if let Some(m) = caps.get(2) {
          ("\"", m.as_str())
        } else if let Some(m) = caps.get(3) {
          ("'", m.as_str())
        } else {
          ("", caps.get(4).map_or("", |m| m.as_str()))
        };
        let rewritten = escape_attr(&self.to_amp_url(value));
        format!("<a {atts}href={quote}{rewritten}{quote}")
      })
      .into_owned()
  }
}

/// HTML attribute escaping that leaves existing entities alone.
fn escape_attr(value: &str) -> String {
  static BARE_AMP: OnceLock<Regex> = OnceLock::new();
  let bare_amp = BARE_AMP.get_or_init(|| {
    Regex::new(r"&(?:([a-zA-Z][a-zA-Z0-9]*|#[0-9]+|#[xX][0-9a-fA-F]+);)?")
      .expect("entity pattern is valid")
  });

  let escaped = bare_amp.replace_all(value, |caps: &regex::Captures| {
    if caps.get(1).is_some() {
      caps.get(0).map_or("", |m| m.as_str()).to_string()
    } else {
      "&amp;".to_string()
    }
  });

  escaped
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
    .replace('\'', "&#039;")
}
