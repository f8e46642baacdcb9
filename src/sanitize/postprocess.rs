//! Structural post-processor.
//!
//! Document-wide, tag-specific transformations that run once after the rule
//! engine, within the body only: embedded-content stripping, `<style>`
//! extraction into the aggregate, `<form>` action rewriting, and
//! audio/video replacement with their mandated counterparts.

use super::Sanitizer;
use super::AMP_ANALYTICS_TAG;
use super::AMP_AUDIO_SCRIPT;
use super::AMP_FORM_COMPONENT;
use super::AMP_FORM_SCRIPT;
use super::AMP_VIDEO_SCRIPT;
use crate::dom;
use crate::urlrewrite::parse_loose;
use markup5ever_rcdom::Handle;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Embedded-content tags dropped wholesale (modulo the analytics exception).
const EMBEDDED_TAGS: [&str; 3] = ["script", "svg", "canvas"];

const VALID_FORM_TARGETS: [&str; 2] = ["_blank", "_top"];

fn important_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\s*!\s*important").expect("important pattern is valid"))
}

fn https_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^\s*https://").expect("https pattern is valid"))
}

impl Sanitizer<'_> {
  pub(crate) fn postprocess_document(&mut self, body: &Handle) {
    self.strip_embedded_content(body);
    self.extract_style_elements(body);
    self.rewrite_forms(body);
    self.replace_media_tags(body);
  }

  /// Remove `script`/`svg`/`canvas`, sparing structured analytics
  /// configuration (`<script type="application/json">` directly under the
  /// analytics replacement tag).
  fn strip_embedded_content(&mut self, body: &Handle) {
    for tag in EMBEDDED_TAGS {
      for element in dom::elements_by_tag(body, tag).iter().rev() {
        if tag == "script" {
          let parent_is_analytics = dom::parent(element)
            .and_then(|p| dom::tag_name(&p).map(|t| t == AMP_ANALYTICS_TAG))
            .unwrap_or(false);
          if parent_is_analytics
            && dom::get_attribute(element, "type").as_deref() == Some("application/json")
          {
            continue;
          }
        }
        dom::remove_element(element);
      }
    }
  }

  /// Remove every `style` element, appending its text (minus `!important`
  /// markers) to the style aggregate.
  fn extract_style_elements(&mut self, body: &Handle) {
    for element in dom::elements_by_tag(body, "style").iter().rev() {
      let css = important_re()
        .replace_all(&dom::text_content(element), "")
        .into_owned();
      self.add_inline_style(css);
      dom::remove_element(element);
    }
  }

  /// Resolve every form's action into either `action` (GET forms navigate)
  /// or `action-xhr`, and pin `target` to a safe value.
  fn rewrite_forms(&mut self, body: &Handle) {
    let forms = dom::elements_by_tag(body, "form");
    if forms.is_empty() {
      return;
    }
    self.enqueue_script(AMP_FORM_COMPONENT, AMP_FORM_SCRIPT);

    let root = self.doc.root();
    for element in forms.iter().rev() {
      if !dom::is_attached(element, &root) {
        continue;
      }

      let mut action = String::new();
      if let Some(value) = dom::get_attribute(element, "action").filter(|v| !v.is_empty()) {
        dom::remove_attributes(element, &["action"]);
        action = value;
      }
      if let Some(value) = dom::get_attribute(element, "action-xhr").filter(|v| !v.is_empty()) {
        action = value;
      }

      let resolved = if action.is_empty() {
        // No action anywhere: submit back to the current page.
        Some(self.page_path().to_string())
      } else {
        self.resolve_form_action(&action)
      };
      let Some(resolved) = resolved else {
        debug!("dropping form with unresolvable action");
        dom::remove_element(element);
        continue;
      };

      // GET forms use plain navigation; everything else submits via XHR.
      let method = dom::get_attribute(element, "method")
        .unwrap_or_default()
        .to_ascii_lowercase();
      let action_attr = if method.is_empty() || method == "get" {
        "action"
      } else {
        "action-xhr"
      };
      dom::set_attribute(element, action_attr, &resolved);

      let target_ok = matches!(
        dom::get_attribute(element, "target").as_deref(),
        Some(t) if VALID_FORM_TARGETS.contains(&t)
      );
      if !target_ok {
        dom::set_attribute(element, "target", "_top");
      }
    }
  }

  /// Classify a form action: schemeless paths and https URLs pass through;
  /// anything else must resolve as an internal-site URL or the form is
  /// unrecoverable.
  fn resolve_form_action(&self, action: &str) -> Option<String> {
    let parsed = parse_loose(action);
    if parsed.scheme.is_none() && !parsed.path.is_empty() {
      return Some(parsed.path);
    }
    if parsed.scheme.as_deref() == Some("https") {
      return Some(action.to_string());
    }
    if let Some(internal) = self.rewriter().parse_internal_url(action) {
      return Some(if internal.path.is_empty() {
        "/".to_string()
      } else {
        internal.path
      });
    }
    None
  }

  /// Replace `audio`/`video` with their mandated counterparts, requiring an
  /// https `source` child. Instances under `noscript` are fallback content
  /// and stay untouched.
  fn replace_media_tags(&mut self, body: &Handle) {
    let replacements = [
      ("audio", "amp-audio", AMP_AUDIO_SCRIPT),
      ("video", "amp-video", AMP_VIDEO_SCRIPT),
    ];

    let root = self.doc.root();
    for (tag, component, script_src) in replacements {
      for element in dom::elements_by_tag(body, tag).iter().rev() {
        if !dom::is_attached(element, &root) {
          continue;
        }
        let parent_is_noscript = dom::parent(element)
          .and_then(|p| dom::tag_name(&p).map(|t| t == "noscript"))
          .unwrap_or(false);
        if parent_is_noscript {
          continue;
        }

        let src = dom::children(element)
          .iter()
          .filter(|c| matches!(dom::tag_name(c), Some("source")))
          .find_map(|source| dom::get_attribute(source, "src").filter(|s| !s.is_empty()));
        let Some(src) = src else {
          debug!(%tag, "dropping media element without a usable source");
          dom::remove_element(element);
          continue;
        };

        // Mixed-content and protocol-relative sources are rejected.
        if !https_re().is_match(&src) {
          debug!(%tag, %src, "dropping media element with non-https source");
          dom::remove_element(element);
          continue;
        }

        dom::set_attribute(element, "src", &src);
        dom::rename_element(element, component);
        self.enqueue_script(component, script_src);
      }
    }
  }
}
