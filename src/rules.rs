//! Tag/attribute rule table.
//!
//! The rule table is pure data supplied by the caller (or the bundled
//! default): a set of globally allowed tag names plus an ordered list of
//! per-tag attribute rules. Rules are deserialized with serde and compiled
//! once at load time — regexes are built here, and the "whitelist marker"
//! shape (a rule carrying only `name`) is resolved into an explicit variant
//! instead of being re-inferred per element.

pub use crate::error::RuleError;

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::warn;

/// Attributes permitted on every tag regardless of tag-specific rules.
pub const GENERAL_ATTRS: [&str; 7] = ["class", "on", "id", "layout", "width", "height", "sizes"];

/// Compiled rule table: globally allowed tags plus ordered per-tag rules.
#[derive(Debug)]
pub struct RuleSet {
  pub allowed_tags: FxHashSet<String>,
  pub tag_rules: Vec<TagRule>,
}

/// Per-tag bundle of attribute rules and supported layout keywords.
#[derive(Debug)]
pub struct TagRule {
  pub tag_name: String,
  /// Supported layout keywords, uppercase. Empty means the tag has no
  /// layout semantics and the layout step is skipped entirely.
  pub supported_layouts: Vec<String>,
  pub attrs: Vec<AttrRule>,
  /// Every attribute name referenced by any rule for this tag; the
  /// whitelist-marker step spares these.
  pub declared_attr_names: FxHashSet<String>,
}

/// A single constraint/transform applied to one attribute name.
#[derive(Debug)]
pub struct AttrRule {
  pub name: String,
  pub kind: RuleKind,
}

#[derive(Debug)]
pub enum RuleKind {
  /// A rule carrying only `name`: its presence declares the tag's complete
  /// allowed-attribute list and triggers removal of undeclared attributes.
  Whitelist,
  /// A validation/normalization rule.
  Validate(Box<ValidateRule>),
}

#[derive(Debug, Default)]
pub struct ValidateRule {
  /// Element is dropped if the attribute is absent.
  pub mandatory: bool,
  /// At least one of these names must be present, else the element is
  /// dropped — unless `value` supplies a default to inject.
  pub mandatory_oneof: Vec<String>,
  /// Fixed value to force/inject.
  pub value: Option<String>,
  /// Anchored, case-sensitive value pattern.
  pub value_regex: Option<Regex>,
  /// Anchored, case-insensitive value pattern.
  pub value_regex_case: Option<Regex>,
  /// The attribute is removed when the value does NOT match this pattern
  /// (the pattern models the allowed shape; the field name is historical).
  pub blacklisted_value_regex: Option<Regex>,
  pub value_url: Option<UrlPolicy>,
}

/// URL constraints for an attribute value.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
  pub allow_empty: bool,
  /// Schemes accepted when the value carries an explicit scheme. Values
  /// without a scheme are not checked against this set.
  pub allowed_protocol: FxHashSet<String>,
  pub allow_relative: bool,
}

impl Default for UrlPolicy {
  fn default() -> Self {
    Self {
      allow_empty: true,
      allowed_protocol: FxHashSet::default(),
      allow_relative: true,
    }
  }
}

#[derive(Deserialize)]
struct RawRuleSet {
  #[serde(default)]
  allowed_tags: Vec<String>,
  #[serde(default)]
  tags: Vec<RawTagRule>,
}

#[derive(Deserialize)]
struct RawTagRule {
  tag_name: String,
  #[serde(default)]
  layouts: RawLayouts,
  #[serde(default)]
  attrs: Vec<RawAttrRule>,
}

#[derive(Deserialize, Default)]
struct RawLayouts {
  #[serde(default)]
  supported_layouts: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawAttrRule {
  name: Option<String>,
  #[serde(default)]
  mandatory: bool,
  mandatory_oneof: Option<Vec<String>>,
  value: Option<String>,
  value_regex: Option<String>,
  value_regex_case: Option<String>,
  blacklisted_value_regex: Option<String>,
  value_url: Option<RawUrlPolicy>,
}

#[derive(Deserialize)]
struct RawUrlPolicy {
  allow_empty: Option<bool>,
  #[serde(default)]
  allowed_protocol: Vec<String>,
  allow_relative: Option<bool>,
}

impl RawAttrRule {
  fn is_whitelist_marker(&self) -> bool {
    !self.mandatory
      && self.mandatory_oneof.is_none()
      && self.value.is_none()
      && self.value_regex.is_none()
      && self.value_regex_case.is_none()
      && self.blacklisted_value_regex.is_none()
      && self.value_url.is_none()
  }
}

const DEFAULT_RULES_JSON: &str = include_str!("../rules/default-rules.json");

impl RuleSet {
  /// Load a rule table from JSON.
  pub fn from_json(json: &str) -> Result<Self, RuleError> {
    let raw: RawRuleSet = serde_json::from_str(json)?;
    Self::compile(raw)
  }

  /// The bundled AMP-flavored default rule table.
  pub fn default_rules() -> Self {
    Self::from_json(DEFAULT_RULES_JSON).expect("bundled rule table is valid")
  }

  fn compile(raw: RawRuleSet) -> Result<Self, RuleError> {
    let allowed_tags = raw
      .allowed_tags
      .into_iter()
      .map(|t| t.to_ascii_lowercase())
      .collect();

    let mut tag_rules = Vec::with_capacity(raw.tags.len());
    for raw_tag in raw.tags {
      let mut attrs = Vec::with_capacity(raw_tag.attrs.len());
      let mut declared = FxHashSet::default();
      for raw_attr in raw_tag.attrs {
        let Some(name) = raw_attr.name.clone().filter(|n| !n.is_empty()) else {
          warn!(tag = %raw_tag.tag_name, "skipping attribute rule with no name");
          continue;
        };
        declared.insert(name.clone());
        let kind = if raw_attr.is_whitelist_marker() {
          RuleKind::Whitelist
        } else {
          RuleKind::Validate(Box::new(compile_validate(&name, raw_attr)?))
        };
        attrs.push(AttrRule { name, kind });
      }
      tag_rules.push(TagRule {
        tag_name: raw_tag.tag_name.to_ascii_lowercase(),
        supported_layouts: raw_tag
          .layouts
          .supported_layouts
          .into_iter()
          .map(|l| l.to_ascii_uppercase())
          .collect(),
        attrs,
        declared_attr_names: declared,
      });
    }

    Ok(Self {
      allowed_tags,
      tag_rules,
    })
  }

  pub fn is_tag_allowed(&self, tag: &str) -> bool {
    self.allowed_tags.contains(&tag.to_ascii_lowercase())
  }
}

fn compile_validate(name: &str, raw: RawAttrRule) -> Result<ValidateRule, RuleError> {
  // Patterns must match the whole value; the non-capturing group keeps
  // alternations anchored on both sides.
  let anchored = |pattern: &str, case_insensitive: bool| {
    let flags = if case_insensitive { "(?i)" } else { "" };
    compile_pattern(name, &format!("{flags}^(?:{pattern})$"), pattern)
  };

  Ok(ValidateRule {
    mandatory: raw.mandatory,
    mandatory_oneof: raw.mandatory_oneof.unwrap_or_default(),
    value: raw.value,
    value_regex: raw
      .value_regex
      .as_deref()
      .map(|p| anchored(p, false))
      .transpose()?,
    value_regex_case: raw
      .value_regex_case
      .as_deref()
      .map(|p| anchored(p, true))
      .transpose()?,
    blacklisted_value_regex: raw
      .blacklisted_value_regex
      .as_deref()
      .map(|p| compile_pattern(name, p, p))
      .transpose()?,
    value_url: raw.value_url.map(|u| UrlPolicy {
      allow_empty: u.allow_empty.unwrap_or(true),
      allowed_protocol: u
        .allowed_protocol
        .into_iter()
        .map(|s| s.to_ascii_lowercase())
        .collect(),
      allow_relative: u.allow_relative.unwrap_or(true),
    }),
  })
}

fn compile_pattern(attr: &str, full: &str, original: &str) -> Result<Regex, RuleError> {
  Regex::new(full).map_err(|source| RuleError::InvalidPattern {
    attr: attr.to_string(),
    pattern: original.to_string(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn whitelist_marker_detected_at_load() {
    let rules = RuleSet::from_json(
      r#"{
        "allowed_tags": ["a"],
        "tags": [{
          "tag_name": "a",
          "attrs": [
            { "name": "href", "value_url": { "allow_empty": false } },
            { "name": "target", "value_regex": "(_blank|_top)" },
            { "name": "name" }
          ]
        }]
      }"#,
    )
    .expect("rules load");

    let tag = &rules.tag_rules[0];
    assert!(matches!(tag.attrs[0].kind, RuleKind::Validate(_)));
    assert!(matches!(tag.attrs[1].kind, RuleKind::Validate(_)));
    assert!(matches!(tag.attrs[2].kind, RuleKind::Whitelist));
    assert!(tag.declared_attr_names.contains("href"));
    assert!(tag.declared_attr_names.contains("name"));
  }

  #[test]
  fn nameless_rules_are_skipped_not_fatal() {
    let rules = RuleSet::from_json(
      r#"{
        "allowed_tags": [],
        "tags": [{
          "tag_name": "p",
          "attrs": [{ "mandatory": true }, { "name": "align" }]
        }]
      }"#,
    )
    .expect("rules load");
    assert_eq!(rules.tag_rules[0].attrs.len(), 1);
    assert_eq!(rules.tag_rules[0].attrs[0].name, "align");
  }

  #[test]
  fn invalid_pattern_is_a_load_error() {
    let err = RuleSet::from_json(
      r#"{
        "allowed_tags": [],
        "tags": [{ "tag_name": "p", "attrs": [{ "name": "x", "value_regex": "(" }] }]
      }"#,
    )
    .unwrap_err();
    assert!(matches!(err, RuleError::InvalidPattern { .. }));
  }

  #[test]
  fn bundled_rules_load() {
    let rules = RuleSet::default_rules();
    assert!(rules.is_tag_allowed("p"));
    assert!(rules.is_tag_allowed("amp-img"));
    assert!(!rules.is_tag_allowed("marquee"));
    assert!(rules.tag_rules.iter().any(|t| t.tag_name == "amp-img"));
  }

  #[test]
  fn layouts_are_uppercased() {
    let rules = RuleSet::from_json(
      r#"{
        "allowed_tags": [],
        "tags": [{
          "tag_name": "amp-img",
          "layouts": { "supported_layouts": ["fixed", "responsive"] },
          "attrs": [{ "name": "src", "mandatory": true }]
        }]
      }"#,
    )
    .expect("rules load");
    assert_eq!(rules.tag_rules[0].supported_layouts, vec!["FIXED", "RESPONSIVE"]);
  }
}
