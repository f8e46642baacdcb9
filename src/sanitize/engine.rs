//! Attribute rule engine.
//!
//! For each tag rule, all current instances of the tag are snapshotted once
//! and every attribute rule is applied to each instance in reverse document
//! order. A handle may become detached by an earlier rule; liveness is
//! re-checked before every use. Invalid states never raise: the escalation
//! is rewrite value, strip attribute, or drop the element with its subtree.

use super::Sanitizer;
use super::AMP_IMG_TAG;
use crate::dom;
use crate::rules::AttrRule;
use crate::rules::RuleKind;
use crate::rules::TagRule;
use crate::rules::UrlPolicy;
use crate::rules::GENERAL_ATTRS;
use crate::urlrewrite::parse_loose;
use markup5ever_rcdom::Handle;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Which dimension a raw value is for; percentages only resolve for widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
  Width,
  Height,
}

/// Normalize a raw dimension value.
///
/// Empty input passes through; integer-like and `px` values become absolute
/// integers; `%` widths resolve against the container width; anything else
/// yields the empty string (invalid, droppable).
pub fn sanitize_dimension(value: &str, dimension: Dimension, container_width: u32) -> String {
  if value.is_empty() {
    return String::new();
  }

  if let Ok(n) = value.trim().parse::<i64>() {
    return n.unsigned_abs().to_string();
  }

  if value.ends_with("px") {
    return absint(value).to_string();
  }

  if value.ends_with('%') && dimension == Dimension::Width {
    let fraction = absint(value) as f64 / 100.0;
    return ((fraction * f64::from(container_width)).round() as u64).to_string();
  }

  String::new()
}

/// Leading-integer parse with the sign dropped; trailing junk is ignored.
fn absint(value: &str) -> u64 {
  let trimmed = value.trim();
  let rest = trimmed
    .strip_prefix('-')
    .or_else(|| trimmed.strip_prefix('+'))
    .unwrap_or(trimmed);
  let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
  digits.parse::<u64>().unwrap_or(0)
}

type AttrMap = FxHashMap<String, String>;

fn nonempty<'m>(atts: &'m AttrMap, name: &str) -> Option<&'m str> {
  atts.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

/// Tag-specific attribute values that are invalid regardless of the rule
/// list. `width="auto"` is never valid on the image replacement tag.
fn invalid_attrs(tag_name: &str, atts: &AttrMap) -> Vec<String> {
  let mut invalid = Vec::new();
  if tag_name == AMP_IMG_TAG && atts.get("width").map(String::as_str) == Some("auto") {
    invalid.push("width".to_string());
  }
  invalid
}

impl Sanitizer<'_> {
  pub(crate) fn apply_tag_rules(&mut self) {
    let rules = self.rules;
    let root = self.doc.root();

    for tag_rule in &rules.tag_rules {
      let elements = self.doc.get_elements_by_tag(&tag_rule.tag_name);
      if elements.is_empty() {
        continue;
      }

      for attr_rule in &tag_rule.attrs {
        for element in elements.iter().rev() {
          if !dom::is_attached(element, &root) {
            continue;
          }
          self.apply_rule_to_element(tag_rule, attr_rule, element);
        }
      }
    }
  }

  fn apply_rule_to_element(&mut self, tag_rule: &TagRule, attr_rule: &AttrRule, element: &Handle) {
    let mut atts: AttrMap = dom::attributes(element)
      .into_iter()
      .map(|(k, v)| (k.to_ascii_lowercase(), v))
      .collect();

    let mut attrs2remove = invalid_attrs(&tag_rule.tag_name, &atts);
    for name in &attrs2remove {
      atts.remove(name);
    }
    let mut new_atts: Vec<(String, String)> = Vec::new();
    let mut mandatory = false;

    // An auto height can never be expressed on the image replacement tag.
    if tag_rule.tag_name == AMP_IMG_TAG && atts.get("height").map(String::as_str) == Some("auto") {
      debug!(tag = %tag_rule.tag_name, "dropping element with height=auto");
      dom::remove_element(element);
      return;
    }

    if !tag_rule.supported_layouts.is_empty() {
      self.normalize_layout(tag_rule, element, &atts, &mut attrs2remove, &mut new_atts);
    }

    match &attr_rule.kind {
      RuleKind::Validate(rule) => {
        if rule.mandatory {
          if !atts.contains_key(&attr_rule.name) {
            debug!(tag = %tag_rule.tag_name, attr = %attr_rule.name, "mandatory attribute missing");
            dom::remove_element(element);
            return;
          }
          mandatory = true;
        }

        if !rule.mandatory_oneof.is_empty() {
          if rule.mandatory_oneof.iter().any(|n| atts.contains_key(n)) {
            mandatory = true;
          } else {
            match rule.value.as_deref().filter(|v| !v.is_empty()) {
              Some(default) => new_atts.push((attr_rule.name.clone(), default.to_string())),
              None => {
                debug!(tag = %tag_rule.tag_name, attr = %attr_rule.name, "no mandatory-oneof alternative present");
                dom::remove_element(element);
                return;
              }
            }
          }
        }

        if let Some(value) = nonempty(&atts, &attr_rule.name) {
          let mut remove_element = false;
          for pattern in [&rule.value_regex, &rule.value_regex_case]
            .into_iter()
            .flatten()
          {
            if !pattern.is_match(value) {
              if mandatory {
                remove_element = true;
              } else {
                attrs2remove.push(attr_rule.name.clone());
                break;
              }
            }
          }
          if remove_element {
            debug!(tag = %tag_rule.tag_name, attr = %attr_rule.name, "mandatory value failed pattern");
            dom::remove_element(element);
            return;
          }

          // Inverted sense: the pattern models the allowed shape, and the
          // attribute goes when the value does NOT match it.
          if let Some(pattern) = &rule.blacklisted_value_regex {
            if !pattern.is_match(value) {
              attrs2remove.push(attr_rule.name.clone());
            }
          }
        }

        if let Some(policy) = &rule.value_url {
          if !self.check_url_policy(policy, &atts, attr_rule, mandatory, &mut attrs2remove) {
            debug!(tag = %tag_rule.tag_name, attr = %attr_rule.name, "mandatory URL failed policy");
            dom::remove_element(element);
            return;
          }
        }

        if let Some(fixed) = &rule.value {
          if let Some(current) = atts.get(&attr_rule.name) {
            if current != fixed {
              new_atts.push((attr_rule.name.clone(), fixed.clone()));
            }
          }
        }
      }

      RuleKind::Whitelist => {
        // This rule declares the complete allowed-attribute list for the
        // tag: everything not general, not data-*, and not declared by some
        // rule goes.
        for name in atts.keys() {
          if GENERAL_ATTRS.contains(&name.as_str()) {
            continue;
          }
          if name.starts_with("data-") {
            continue;
          }
          if tag_rule.declared_attr_names.contains(name) {
            continue;
          }
          attrs2remove.push(name.clone());
        }
      }
    }

    // Tap-triggered interactivity requires focusability and a role.
    if let Some(on) = nonempty(&atts, "on") {
      if on.starts_with("tap:") {
        if nonempty(&atts, "tabindex").is_none() {
          new_atts.push(("tabindex".to_string(), self.next_tabindex().to_string()));
        }
        if nonempty(&atts, "role").is_none() {
          new_atts.push(("role".to_string(), tag_rule.tag_name.clone()));
        }
      }
    }

    if let Some(width) = atts.get("width") {
      if width.contains('%') {
        new_atts.push((
          "width".to_string(),
          sanitize_dimension(width, Dimension::Width, self.container_width()),
        ));
      }
    }

    if !attrs2remove.is_empty() {
      let names: Vec<&str> = attrs2remove.iter().map(String::as_str).collect();
      dom::remove_attributes(element, &names);
    }
    if !new_atts.is_empty() {
      dom::add_attributes(element, new_atts.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
  }

  /// Layout keyword validation and synthesis.
  ///
  /// A declared, supported layout is validated against its width/height
  /// requirements (failure removes the `layout` attribute, never the
  /// element). A declared but unsupported layout is replaced by a
  /// synthesized one. With no layout declared, an auto width alongside a
  /// height is only meaningful where FIXED-HEIGHT is available.
  fn normalize_layout(
    &mut self,
    tag_rule: &TagRule,
    element: &Handle,
    atts: &AttrMap,
    attrs2remove: &mut Vec<String>,
    new_atts: &mut Vec<(String, String)>,
  ) {
    match nonempty(atts, "layout") {
      Some(layout) => {
        let layout = layout.to_uppercase();
        if tag_rule.supported_layouts.contains(&layout) {
          validate_layout_requirements(&layout, element, atts);
        } else if nonempty(atts, "width").is_some() && nonempty(atts, "height").is_some() {
          new_atts.push(("layout".to_string(), "responsive".to_string()));
        } else {
          new_atts.push(("layout".to_string(), "fill".to_string()));
        }
      }
      None => {
        if atts.get("width").map(String::as_str) == Some("auto")
          && nonempty(atts, "height").is_some()
          && !tag_rule.supported_layouts.iter().any(|l| l == "FIXED-HEIGHT")
        {
          attrs2remove.push("width".to_string());
        }
      }
    }
  }

  /// Returns `false` when the element must be dropped (mandatory attribute
  /// with an unrecoverable URL); otherwise records attribute removals.
  fn check_url_policy(
    &self,
    policy: &UrlPolicy,
    atts: &AttrMap,
    attr_rule: &AttrRule,
    mandatory: bool,
    attrs2remove: &mut Vec<String>,
  ) -> bool {
    let value = nonempty(atts, &attr_rule.name);
    let parsed = value.map(parse_loose).unwrap_or_default();
    let mut remove_element = false;
    let mut flag = |remove_element: &mut bool, attrs2remove: &mut Vec<String>| {
      if mandatory {
        *remove_element = true;
      } else {
        attrs2remove.push(attr_rule.name.clone());
      }
    };

    if !policy.allow_empty && value.is_none() {
      flag(&mut remove_element, attrs2remove);
    }

    // Schemeless values are deliberately not held against the protocol
    // whitelist; only an explicit scheme is checked.
    if !policy.allowed_protocol.is_empty() {
      if let Some(scheme) = &parsed.scheme {
        if !policy.allowed_protocol.contains(&scheme.to_ascii_lowercase()) {
          flag(&mut remove_element, attrs2remove);
        }
      }
    }

    if !policy.allow_relative && parsed.host.is_none() {
      flag(&mut remove_element, attrs2remove);
    }

    !remove_element
  }
}

/// Width/height presence requirements per layout keyword; failure removes
/// the `layout` attribute from the element immediately.
fn validate_layout_requirements(layout: &str, element: &Handle, atts: &AttrMap) {
  let (need_width, need_height) = match layout {
    "FIXED-HEIGHT" => (false, true),
    "FIXED" | "RESPONSIVE" => (true, true),
    // FILL / CONTAINER / FLEX-ITEM / NODISPLAY carry no requirement.
    _ => (false, false),
  };

  let missing = |name: &str| {
    nonempty(atts, name).is_none() || atts.get(name).map(String::as_str) == Some("auto")
  };

  if (need_width && missing("width")) || (need_height && missing("height")) {
    dom::remove_attributes(element, &["layout"]);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::SiteConfig;
  use crate::dom;
  use crate::dom::parse_html;
  use crate::rules::RuleSet;
  use crate::sanitize::SanitizeReport;
  use crate::sanitize::Sanitizer;

  fn run_with(rules: &RuleSet, html: &str) -> (crate::dom::Document, SanitizeReport) {
    let doc = parse_html(html);
    let config = SiteConfig::default();
    let report = Sanitizer::new(&doc, rules, &config).sanitize();
    (doc, report)
  }

  fn run(html: &str) -> (crate::dom::Document, SanitizeReport) {
    let rules = RuleSet::default_rules();
    let doc = parse_html(html);
    let config = SiteConfig::default();
    let report = Sanitizer::new(&doc, &rules, &config).sanitize();
    (doc, report)
  }

  #[test]
  fn dimension_sanitization_matches_contract() {
    assert_eq!(sanitize_dimension("50%", Dimension::Width, 600), "300");
    assert_eq!(sanitize_dimension("120px", Dimension::Height, 600), "120");
    assert_eq!(sanitize_dimension("50%", Dimension::Height, 600), "");
    assert_eq!(sanitize_dimension("", Dimension::Width, 600), "");
    assert_eq!(sanitize_dimension("240", Dimension::Width, 600), "240");
    assert_eq!(sanitize_dimension("-240", Dimension::Width, 600), "240");
    assert_eq!(sanitize_dimension("auto", Dimension::Width, 600), "");
    assert_eq!(sanitize_dimension("33%", Dimension::Width, 600), "198");
  }

  #[test]
  fn amp_img_auto_height_drops_element() {
    let (doc, _) = run(r#"<body><amp-img src="/a.png" height="auto"></amp-img></body>"#);
    assert!(doc.get_elements_by_tag("amp-img").is_empty());
  }

  #[test]
  fn amp_img_auto_width_is_stripped() {
    let (doc, _) = run(r#"<body><amp-img src="/a.png" width="auto" layout="fill"></amp-img></body>"#);
    let img = doc.get_elements_by_tag("amp-img").remove(0);
    assert!(dom::get_attribute(&img, "width").is_none());
    assert_eq!(dom::get_attribute(&img, "src").as_deref(), Some("/a.png"));
  }

  #[test]
  fn mandatory_attribute_missing_drops_element() {
    let (doc, _) = run(r#"<body><amp-iframe width="100" height="100"></amp-iframe></body>"#);
    assert!(doc.get_elements_by_tag("amp-iframe").is_empty());
  }

  #[test]
  fn mandatory_oneof_accepts_either_alternative() {
    let (doc, _) = run(
      r#"<body><amp-img srcset="/a.png 1x" width="10" height="10"></amp-img>
         <amp-img width="10" height="10" alt="no source"></amp-img></body>"#,
    );
    assert_eq!(doc.get_elements_by_tag("amp-img").len(), 1);
  }

  #[test]
  fn value_regex_mismatch_strips_optional_attribute() {
    let (doc, _) = run(r#"<body><a href="/x" target="_parent">t</a></body>"#);
    let a = doc.get_elements_by_tag("a").remove(0);
    assert!(dom::get_attribute(&a, "target").is_none());
    assert_eq!(dom::get_attribute(&a, "href").as_deref(), Some("/x"));
  }

  #[test]
  fn value_regex_mismatch_on_mandatory_attribute_drops_element() {
    let rules = RuleSet::from_json(
      r#"{
        "allowed_tags": ["body", "html", "head", "p"],
        "tags": [{
          "tag_name": "p",
          "attrs": [{ "name": "align", "mandatory": true, "value_regex": "(left|right)" }]
        }]
      }"#,
    )
    .expect("rules load");
    let (doc, _) = run_with(&rules, r#"<body><p align="center">t</p><p align="left">u</p></body>"#);
    let kept = doc.get_elements_by_tag("p");
    assert_eq!(kept.len(), 1);
    assert_eq!(dom::get_attribute(&kept[0], "align").as_deref(), Some("left"));
  }

  #[test]
  fn blacklist_pattern_removes_attribute_when_value_does_not_match() {
    // The pattern models the allowed shape; a non-matching value loses the
    // attribute, a matching one keeps it.
    let (doc, _) = run(
      r#"<body><input type="image" name="a"><input type="email" name="b"></body>"#,
    );
    let inputs = doc.get_elements_by_tag("input");
    assert_eq!(inputs.len(), 2);
    let by_name = |n: &str| {
      inputs
        .iter()
        .find(|i| dom::get_attribute(i, "name").as_deref() == Some(n))
        .cloned()
        .unwrap()
    };
    assert!(dom::get_attribute(&by_name("a"), "type").is_none());
    assert_eq!(dom::get_attribute(&by_name("b"), "type").as_deref(), Some("email"));
  }

  #[test]
  fn url_protocol_check_only_fires_with_explicit_scheme() {
    // Documented lenience: a schemeless value passes even with a
    // restrictive protocol set, and amp-iframe additionally requires a
    // host, so the relative URL still fails on allow_relative.
    let (doc, _) = run(
      r#"<body>
        <amp-iframe src="javascript:alert(1)" width="10" height="10"></amp-iframe>
        <amp-img src="gopher://hole/a.png" width="10" height="10" alt="x"></amp-img>
        <amp-img src="/relative/ok.png" width="10" height="10" alt="y"></amp-img>
      </body>"#,
    );
    // javascript: scheme not in {https} and src is mandatory: element gone.
    assert!(doc.get_elements_by_tag("amp-iframe").is_empty());

    let imgs = doc.get_elements_by_tag("amp-img");
    // gopher: fails the protocol whitelist; src is mandatory-oneof
    // (counts as mandatory when present), so that element is gone too.
    assert_eq!(imgs.len(), 1);
    assert_eq!(dom::get_attribute(&imgs[0], "src").as_deref(), Some("/relative/ok.png"));
  }

  #[test]
  fn fixed_value_coercion_overwrites() {
    let rules = RuleSet::from_json(
      r#"{
        "allowed_tags": ["body", "html", "head", "p"],
        "tags": [{
          "tag_name": "p",
          "attrs": [{ "name": "role", "value": "presentation", "mandatory": true }]
        }]
      }"#,
    )
    .expect("rules load");
    let (doc, _) = run_with(&rules, r#"<body><p role="button">t</p></body>"#);
    let p = doc.get_elements_by_tag("p").remove(0);
    assert_eq!(dom::get_attribute(&p, "role").as_deref(), Some("presentation"));
  }

  #[test]
  fn whitelist_marker_strips_undeclared_attributes() {
    let (doc, _) = run(
      r#"<body><a href="/x" hreflang="en" data-vars-a="1" class="k" id="i" title="t">t</a></body>"#,
    );
    let a = doc.get_elements_by_tag("a").remove(0);
    // declared (href, title), general (class, id), data-* survive
    assert_eq!(dom::get_attribute(&a, "href").as_deref(), Some("/x"));
    assert_eq!(dom::get_attribute(&a, "title").as_deref(), Some("t"));
    assert_eq!(dom::get_attribute(&a, "class").as_deref(), Some("k"));
    assert_eq!(dom::get_attribute(&a, "id").as_deref(), Some("i"));
    assert_eq!(dom::get_attribute(&a, "data-vars-a").as_deref(), Some("1"));
    // undeclared goes
    assert!(dom::get_attribute(&a, "hreflang").is_none());
  }

  #[test]
  fn tap_action_injects_tabindex_and_role() {
    let (doc, _) = run(
      r#"<body>
        <button on="tap:sidebar">menu</button>
        <button on="tap:other" role="menu" tabindex="3">alt</button>
      </body>"#,
    );
    let buttons = doc.get_elements_by_tag("button");
    assert_eq!(dom::get_attribute(&buttons[0], "tabindex").as_deref(), Some("10"));
    assert_eq!(dom::get_attribute(&buttons[0], "role").as_deref(), Some("button"));
    // Existing values are not overwritten.
    assert_eq!(dom::get_attribute(&buttons[1], "tabindex").as_deref(), Some("3"));
    assert_eq!(dom::get_attribute(&buttons[1], "role").as_deref(), Some("menu"));
  }

  #[test]
  fn percentage_width_resolves_against_container() {
    let (doc, _) = run(
      r#"<body><amp-img src="/a.png" width="50%" height="10" alt="x"></amp-img></body>"#,
    );
    let img = doc.get_elements_by_tag("amp-img").remove(0);
    assert_eq!(dom::get_attribute(&img, "width").as_deref(), Some("300"));
  }

  #[test]
  fn unsupported_layout_synthesizes_responsive_or_fill() {
    let (doc, _) = run(
      r#"<body>
        <amp-img src="/a.png" layout="container" width="10" height="10" alt="a"></amp-img>
        <amp-img src="/b.png" layout="container" alt="b"></amp-img>
      </body>"#,
    );
    let imgs = doc.get_elements_by_tag("amp-img");
    assert_eq!(dom::get_attribute(&imgs[0], "layout").as_deref(), Some("responsive"));
    assert_eq!(dom::get_attribute(&imgs[1], "layout").as_deref(), Some("fill"));
  }

  #[test]
  fn supported_layout_with_missing_dimensions_loses_layout_attribute() {
    let (doc, _) = run(
      r#"<body><amp-img src="/a.png" layout="responsive" width="10" alt="x"></amp-img></body>"#,
    );
    let img = doc.get_elements_by_tag("amp-img").remove(0);
    // RESPONSIVE requires both dimensions: the layout attribute goes, the
    // element stays.
    assert!(dom::get_attribute(&img, "layout").is_none());
    assert_eq!(dom::get_attribute(&img, "src").as_deref(), Some("/a.png"));
  }

  #[test]
  fn layout_normalization_is_idempotent() {
    let html =
      r#"<body><amp-img src="/a.png" layout="responsive" width="10" height="10" alt="x"></amp-img></body>"#;
    let (doc, _) = run(html);
    let first = doc.to_html().expect("serialize");

    let doc2 = parse_html(&first);
    let rules = RuleSet::default_rules();
    let config = SiteConfig::default();
    Sanitizer::new(&doc2, &rules, &config).sanitize();
    let second = doc2.to_html().expect("serialize");
    assert_eq!(first, second);
  }
}
