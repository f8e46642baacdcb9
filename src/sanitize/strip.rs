//! Global attribute stripper.
//!
//! Recursive walk that prunes elements whose tag is not in the allowed set
//! (an unknown tag is an untrusted subtree, so its children go with it),
//! removes blacklisted and event-handler attributes from surviving elements,
//! and collapses pure-formatting `font` wrappers in place of their children.
//! Inline `style` attributes are captured into the pass's style aggregate
//! before removal.

use super::Sanitizer;
use super::BLACKLISTED_ATTRS;
use crate::dom;
use markup5ever_rcdom::Handle;
use tracing::debug;

impl Sanitizer<'_> {
  pub(crate) fn strip_attributes_recursive(&mut self, node: &Handle) {
    if !dom::is_element(node) {
      return;
    }
    let Some(tag) = dom::tag_name(node).map(str::to_string) else {
      return;
    };

    if !self.rules.is_tag_allowed(&tag) {
      debug!(%tag, "pruning disallowed tag");
      dom::remove_element(node);
      return;
    }

    // Reverse index order so in-place removal stays safe.
    for (name, _) in dom::attributes(node).iter().rev() {
      let name = name.to_ascii_lowercase();

      if name == "style" {
        // Capture before any removal decision; the blacklist strips it next.
        self.save_element_style(node);
      }

      if BLACKLISTED_ATTRS.contains(&name.as_str()) {
        dom::remove_attributes(node, &[name.as_str()]);
        continue;
      }

      // Event-handler attributes (onclick, onload, ...) are unconditionally
      // unsafe; the literal `on` attribute is AMP's action syntax and stays.
      if name.starts_with("on") && name != "on" {
        dom::remove_attributes(node, &[name.as_str()]);
      }
    }

    for child in dom::children(node).iter().rev() {
      self.strip_attributes_recursive(child);
    }

    if tag == "font" {
      // The wrapper is untrusted but its content is not: keep the children.
      self.replace_node_with_children(node);
    }
  }

  /// Reinsert clones of all children immediately before `node`, then remove
  /// `node` itself.
  pub(crate) fn replace_node_with_children(&mut self, node: &Handle) {
    let Some(parent) = dom::parent(node) else {
      return;
    };
    for child in dom::children(node) {
      let clone = dom::clone_subtree(&child);
      dom::insert_before(&parent, node, &clone);
    }
    dom::remove_element(node);
  }

  /// Capture an inline `style` attribute as a CSS rule in the aggregate.
  ///
  /// The selector is `#id` when the element has an id; otherwise a synthetic
  /// class is appended to the element and the dotted class list is doubled
  /// for specificity.
  pub(crate) fn save_element_style(&mut self, node: &Handle) {
    let Some(style) = dom::get_attribute(node, "style").filter(|s| !s.is_empty()) else {
      return;
    };

    let id = dom::get_attribute(node, "id").filter(|s| !s.is_empty());
    let selector = match id {
      Some(id) => format!("#{id}"),
      None => {
        let mut class = dom::get_attribute(node, "class").unwrap_or_default();
        if !class.is_empty() {
          class.push(' ');
        }
        class.push_str(&self.next_style_class());
        dom::set_attribute(node, "class", &class);

        let dotted = format!(
          ".{}",
          class.split_whitespace().collect::<Vec<_>>().join(".")
        );
        dotted.repeat(2)
      }
    };

    self.add_inline_style(format!("{selector}{{{style}}}"));
  }
}

#[cfg(test)]
mod tests {
  use crate::config::SiteConfig;
  use crate::dom;
  use crate::dom::parse_html;
  use crate::rules::RuleSet;
  use crate::sanitize::Sanitizer;

  fn run(html: &str) -> (crate::dom::Document, crate::sanitize::SanitizeReport) {
    let doc = parse_html(html);
    let rules = RuleSet::default_rules();
    let config = SiteConfig::default();
    let report = Sanitizer::new(&doc, &rules, &config).sanitize();
    (doc, report)
  }

  #[test]
  fn disallowed_tags_are_pruned_with_children() {
    let (doc, _) = run("<body><p>keep</p><marquee><b>gone</b></marquee></body>");
    assert!(doc.get_elements_by_tag("marquee").is_empty());
    assert!(doc.get_elements_by_tag("b").is_empty());
    assert_eq!(doc.get_elements_by_tag("p").len(), 1);
  }

  #[test]
  fn event_handlers_are_stripped_but_on_survives() {
    let (doc, _) = run(r#"<body><p onclick="x()" onmouseover="y()" on="tap:foo">t</p></body>"#);
    let p = doc.get_elements_by_tag("p").remove(0);
    assert!(dom::get_attribute(&p, "onclick").is_none());
    assert!(dom::get_attribute(&p, "onmouseover").is_none());
    assert_eq!(dom::get_attribute(&p, "on").as_deref(), Some("tap:foo"));
  }

  #[test]
  fn blacklisted_attributes_are_removed() {
    let (doc, _) = run(r#"<body><p style="color:red" size="3">t</p></body>"#);
    let p = doc.get_elements_by_tag("p").remove(0);
    assert!(dom::get_attribute(&p, "style").is_none());
    assert!(dom::get_attribute(&p, "size").is_none());
  }

  #[test]
  fn font_wrapper_collapses_keeping_children_in_order() {
    let (doc, _) = run("<body><div><i>a</i><font color=red><b>x</b>y</font><i>z</i></div></body>");
    assert!(doc.get_elements_by_tag("font").is_empty());
    let div = doc.get_elements_by_tag("div").remove(0);
    let text: String = dom::text_content(&div);
    assert_eq!(text, "axyz");
    assert_eq!(doc.get_elements_by_tag("b").len(), 1);
  }

  #[test]
  fn inline_style_captured_with_id_selector() {
    let (doc, report) = run(r#"<body><p id="intro" style="color:red">t</p></body>"#);
    assert_eq!(report.styles, vec!["#intro{color:red}".to_string()]);
    let p = doc.get_elements_by_tag("p").remove(0);
    assert!(dom::get_attribute(&p, "style").is_none());
  }

  #[test]
  fn inline_style_without_id_gets_synthetic_doubled_class_selector() {
    let (doc, report) = run(r#"<body><p class="a b" style="color:red">t</p></body>"#);
    assert_eq!(report.styles, vec![".a.b.e_1.a.b.e_1{color:red}".to_string()]);
    let p = doc.get_elements_by_tag("p").remove(0);
    assert_eq!(dom::get_attribute(&p, "class").as_deref(), Some("a b e_1"));
  }
}
