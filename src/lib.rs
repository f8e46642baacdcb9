//! ampify rewrites an arbitrary HTML document tree into a restricted
//! AMP-flavored subset: disallowed tags and attributes are removed, certain
//! tags are rewritten into mandated replacements, per-tag attribute rules
//! (mandatory attributes, value patterns, URL schemes, layout semantics)
//! are enforced, and disallowed inline styling is extracted into an
//! external aggregate.
//!
//! The pipeline consumes an already-parsed element tree and mutates it in
//! place; it is not a general HTML5 parser (html5ever handles that).
//!
//! ```
//! use ampify::config::SiteConfig;
//! use ampify::dom::parse_html;
//! use ampify::rules::RuleSet;
//! use ampify::sanitize::Sanitizer;
//!
//! let doc = parse_html(r#"<body><p onclick="x()">hello</p></body>"#);
//! let rules = RuleSet::default_rules();
//! let config = SiteConfig::new("https://example.com", "amp");
//! let report = Sanitizer::new(&doc, &rules, &config).sanitize();
//! let html = doc.to_html().unwrap();
//! assert!(!html.contains("onclick"));
//! assert!(report.styles.is_empty());
//! ```

pub mod config;
pub mod dom;
pub mod error;
pub mod rules;
pub mod sanitize;
pub mod urlrewrite;

pub use config::SiteConfig;
pub use error::{Error, Result};
pub use rules::RuleSet;
pub use sanitize::{SanitizeOptions, SanitizeReport, Sanitizer};
pub use urlrewrite::UrlRewriter;
