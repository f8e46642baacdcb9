//! The sanitize pass.
//!
//! One pass fully owns one document tree and mutates it destructively:
//! global attribute stripping, then the per-tag attribute rule engine, then
//! the structural post-processor. State that the original kept in process
//! globals (tabindex allocator, style aggregate, script enqueue dedup) lives
//! on the pass object so independent documents can be sanitized in parallel
//! and tests stay isolated.

mod engine;
mod postprocess;
mod strip;

pub use engine::sanitize_dimension;
pub use engine::Dimension;

use crate::config::SiteConfig;
use crate::dom::Document;
use crate::rules::RuleSet;
use crate::urlrewrite::UrlRewriter;
use rustc_hash::FxHashSet;

/// Attributes stripped from every element.
pub(crate) const BLACKLISTED_ATTRS: [&str; 2] = ["style", "size"];

pub(crate) const AMP_IMG_TAG: &str = "amp-img";
pub(crate) const AMP_ANALYTICS_TAG: &str = "amp-analytics";

pub(crate) const AMP_FORM_COMPONENT: &str = "amp-form";
pub(crate) const AMP_FORM_SCRIPT: &str = "https://cdn.ampproject.org/v0/amp-form-0.1.js";
pub(crate) const AMP_AUDIO_SCRIPT: &str = "https://cdn.ampproject.org/v0/amp-audio-0.1.js";
pub(crate) const AMP_VIDEO_SCRIPT: &str = "https://cdn.ampproject.org/v0/amp-video-0.1.js";

/// First tabindex handed out to tap-interactive elements.
const TABINDEX_START: u32 = 10;

/// Per-pass options.
#[derive(Debug, Clone)]
pub struct SanitizeOptions {
  /// Root-relative path of the page being sanitized; forms with no action
  /// default to submitting back to it.
  pub page_path: String,
  /// Overrides the configured container width for percentage resolution.
  pub container_width: Option<u32>,
}

impl Default for SanitizeOptions {
  fn default() -> Self {
    Self {
      page_path: "/".to_string(),
      container_width: None,
    }
  }
}

/// An external component script requested by the pass, deduplicated per
/// component per pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentScript {
  pub component: String,
  pub src: String,
}

/// Side effects accumulated over a pass, for the caller to flush: extracted
/// CSS destined for the aggregate style block, and component scripts to
/// enqueue.
#[derive(Debug, Default)]
pub struct SanitizeReport {
  pub styles: Vec<String>,
  pub scripts: Vec<ComponentScript>,
}

impl SanitizeReport {
  /// The aggregate style block contents.
  pub fn style_block(&self) -> String {
    self.styles.concat()
  }
}

/// A single sanitize pass over one document.
pub struct Sanitizer<'a> {
  doc: &'a Document,
  rules: &'a RuleSet,
  options: SanitizeOptions,
  rewriter: UrlRewriter,
  container_width: u32,
  tabindex: u32,
  style_class_seq: u32,
  styles: Vec<String>,
  scripts: Vec<ComponentScript>,
  enqueued: FxHashSet<String>,
}

impl<'a> Sanitizer<'a> {
  pub fn new(doc: &'a Document, rules: &'a RuleSet, config: &SiteConfig) -> Self {
    Self {
      doc,
      rules,
      options: SanitizeOptions::default(),
      rewriter: UrlRewriter::new(config),
      container_width: config.container_width,
      tabindex: TABINDEX_START,
      style_class_seq: 0,
      styles: Vec::new(),
      scripts: Vec::new(),
      enqueued: FxHashSet::default(),
    }
  }

  pub fn with_options(mut self, options: SanitizeOptions) -> Self {
    if let Some(width) = options.container_width {
      self.container_width = width;
    }
    self.options = options;
    self
  }

  /// Run the full pass: stripper, rule engine, structural post-processor.
  ///
  /// The tree is mutated in place; the returned report carries the
  /// accumulated side effects.
  pub fn sanitize(mut self) -> SanitizeReport {
    if let Some(body) = self.doc.body() {
      self.strip_attributes_recursive(&body);
      self.apply_tag_rules();
      self.postprocess_document(&body);
    }

    SanitizeReport {
      styles: self.styles,
      scripts: self.scripts,
    }
  }

  pub(crate) fn next_tabindex(&mut self) -> u32 {
    let value = self.tabindex;
    self.tabindex += 1;
    value
  }

  pub(crate) fn next_style_class(&mut self) -> String {
    self.style_class_seq += 1;
    format!("e_{}", self.style_class_seq)
  }

  pub(crate) fn add_inline_style(&mut self, css: String) {
    self.styles.push(css);
  }

  pub(crate) fn enqueue_script(&mut self, component: &str, src: &str) {
    if self.enqueued.insert(component.to_string()) {
      self.scripts.push(ComponentScript {
        component: component.to_string(),
        src: src.to_string(),
      });
    }
  }

  pub(crate) fn container_width(&self) -> u32 {
    self.container_width
  }

  pub(crate) fn rewriter(&self) -> &UrlRewriter {
    &self.rewriter
  }

  pub(crate) fn page_path(&self) -> &str {
    &self.options.page_path
  }
}
