//! DOM access layer for the sanitizer.
//!
//! HTML is parsed with `html5ever` into a `markup5ever_rcdom` tree and
//! mutated in place: handles are `Rc<Node>` with weak parent back-references,
//! so a snapshot of element handles stays valid while siblings are detached.
//! Detaching a node discards its subtree unless the caller cloned it first.

use crate::error::Result;
use html5ever::parse_document;
use html5ever::serialize::serialize;
use html5ever::serialize::SerializeOpts;
use html5ever::tendril::StrTendril;
use html5ever::tendril::TendrilSink;
use html5ever::Attribute;
use html5ever::LocalName;
use html5ever::tree_builder::TreeBuilderOpts;
use html5ever::ParseOpts;
use html5ever::QualName;
use html5ever::{namespace_url, ns};
use markup5ever_rcdom::Handle;
use markup5ever_rcdom::Node;
use markup5ever_rcdom::NodeData;
use markup5ever_rcdom::RcDom;
use markup5ever_rcdom::SerializableHandle;
use std::rc::Rc;

/// A parsed HTML document, mutated in place by the sanitize pass.
pub struct Document {
  dom: RcDom,
}

/// Parse an HTML string into a `Document`.
///
/// html5ever recovers from malformed markup, so parsing itself is
/// infallible; parse errors are absorbed the way a browser would.
///
/// Parsed with scripting disabled so `noscript` content comes through as
/// elements; the sanitizer treats it as fallback markup, not text.
pub fn parse_html(html: &str) -> Document {
  let opts = ParseOpts {
    tree_builder: TreeBuilderOpts {
      scripting_enabled: false,
      ..Default::default()
    },
    ..Default::default()
  };
  let dom = parse_document(RcDom::default(), opts).one(html);
  Document { dom }
}

impl Document {
  /// The document root node.
  pub fn root(&self) -> Handle {
    self.dom.document.clone()
  }

  /// The `<body>` element, if the document has one.
  pub fn body(&self) -> Option<Handle> {
    elements_by_tag(&self.root(), "body").into_iter().next()
  }

  /// Snapshot of all current elements with the given tag name, in document
  /// order. The snapshot stays valid while the tree is mutated; callers
  /// re-check attachment with [`is_attached`] before acting on an entry.
  pub fn get_elements_by_tag(&self, name: &str) -> Vec<Handle> {
    elements_by_tag(&self.root(), name)
  }

  /// Serialize the document back to HTML text.
  pub fn to_html(&self) -> Result<String> {
    let mut buf = Vec::new();
    let handle: SerializableHandle = self.dom.document.clone().into();
    serialize(&mut buf, &handle, SerializeOpts::default())?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
  }
}

/// Tag name of an element node (html5ever lowercases HTML tags at parse
/// time), or `None` for non-element nodes.
pub fn tag_name(node: &Handle) -> Option<&str> {
  match &node.data {
    NodeData::Element { name, .. } => Some(name.local.as_ref()),
    _ => None,
  }
}

pub fn is_element(node: &Handle) -> bool {
  matches!(node.data, NodeData::Element { .. })
}

/// Parent of a node, if it is attached.
pub fn parent(node: &Handle) -> Option<Handle> {
  let weak = node.parent.take();
  let parent = weak.as_ref().and_then(|w| w.upgrade());
  node.parent.set(weak);
  parent
}

/// Whether `node` is still reachable from `root` by following parents.
pub fn is_attached(node: &Handle, root: &Handle) -> bool {
  let mut current = node.clone();
  loop {
    if Rc::ptr_eq(&current, root) {
      return true;
    }
    match parent(&current) {
      Some(p) => current = p,
      None => return false,
    }
  }
}

/// Snapshot of a node's children, safe to iterate while detaching.
pub fn children(node: &Handle) -> Vec<Handle> {
  node.children.borrow().clone()
}

/// Detach `node` from its parent, discarding the subtree.
pub fn remove_element(node: &Handle) {
  if let Some(parent) = parent(node) {
    parent.children.borrow_mut().retain(|c| !Rc::ptr_eq(c, node));
    node.parent.set(None);
  }
}

/// Append `child` to `parent`, fixing the parent back-reference.
pub fn append_child(parent: &Handle, child: &Handle) {
  child.parent.set(Some(Rc::downgrade(parent)));
  parent.children.borrow_mut().push(child.clone());
}

/// Insert `new_child` into `parent` immediately before `reference`.
///
/// Falls back to appending when `reference` is not among the children.
pub fn insert_before(parent: &Handle, reference: &Handle, new_child: &Handle) {
  new_child.parent.set(Some(Rc::downgrade(parent)));
  let mut children = parent.children.borrow_mut();
  match children.iter().position(|c| Rc::ptr_eq(c, reference)) {
    Some(idx) => children.insert(idx, new_child.clone()),
    None => children.push(new_child.clone()),
  }
}

/// Attribute value by (case-insensitive) name.
pub fn get_attribute(node: &Handle, name: &str) -> Option<String> {
  match &node.data {
    NodeData::Element { attrs, .. } => attrs
      .borrow()
      .iter()
      .find(|a| a.name.local.as_ref().eq_ignore_ascii_case(name))
      .map(|a| a.value.to_string()),
    _ => None,
  }
}

/// All attributes of an element as owned (name, value) pairs, in document
/// order. Non-elements yield an empty list.
pub fn attributes(node: &Handle) -> Vec<(String, String)> {
  match &node.data {
    NodeData::Element { attrs, .. } => attrs
      .borrow()
      .iter()
      .map(|a| (a.name.local.to_string(), a.value.to_string()))
      .collect(),
    _ => Vec::new(),
  }
}

/// Set (or overwrite) a single attribute.
pub fn set_attribute(node: &Handle, name: &str, value: &str) {
  if let NodeData::Element { attrs, .. } = &node.data {
    let mut attrs = attrs.borrow_mut();
    if let Some(existing) = attrs
      .iter_mut()
      .find(|a| a.name.local.as_ref().eq_ignore_ascii_case(name))
    {
      existing.value = StrTendril::from(value);
    } else {
      attrs.push(Attribute {
        name: QualName::new(None, ns!(), LocalName::from(name)),
        value: StrTendril::from(value),
      });
    }
  }
}

/// Bulk add/update of attributes.
pub fn add_attributes<'a, I>(node: &Handle, pairs: I)
where
  I: IntoIterator<Item = (&'a str, &'a str)>,
{
  for (name, value) in pairs {
    set_attribute(node, name, value);
  }
}

/// Bulk removal of attributes by name.
pub fn remove_attributes(node: &Handle, names: &[&str]) {
  if let NodeData::Element { attrs, .. } = &node.data {
    attrs.borrow_mut().retain(|a| {
      !names
        .iter()
        .any(|n| a.name.local.as_ref().eq_ignore_ascii_case(n))
    });
  }
}

/// First direct child element with the given tag name.
pub fn child_by_tag(node: &Handle, tag: &str) -> Option<Handle> {
  node
    .children
    .borrow()
    .iter()
    .find(|c| matches!(tag_name(c), Some(t) if t.eq_ignore_ascii_case(tag)))
    .cloned()
}

/// Concatenated text content of a subtree.
pub fn text_content(node: &Handle) -> String {
  let mut out = String::new();
  collect_text(node, &mut out);
  out
}

fn collect_text(node: &Handle, out: &mut String) {
  if let NodeData::Text { contents } = &node.data {
    out.push_str(&contents.borrow());
  }
  for child in node.children.borrow().iter() {
    collect_text(child, out);
  }
}

/// Deep-clone a subtree into fresh, detached nodes.
///
/// Only node kinds that can appear inside `<body>` content are carried;
/// anything else clones to an empty text node (it would be stripped anyway).
pub fn clone_subtree(node: &Handle) -> Handle {
  let data = match &node.data {
    NodeData::Element { name, attrs, .. } => NodeData::Element {
      name: name.clone(),
      attrs: std::cell::RefCell::new(attrs.borrow().clone()),
      template_contents: std::cell::RefCell::new(None),
      mathml_annotation_xml_integration_point: false,
    },
    NodeData::Text { contents } => NodeData::Text {
      contents: std::cell::RefCell::new(contents.borrow().clone()),
    },
    NodeData::Comment { contents } => NodeData::Comment {
      contents: contents.clone(),
    },
    _ => NodeData::Text {
      contents: std::cell::RefCell::new(StrTendril::new()),
    },
  };
  let clone = Node::new(data);
  for child in node.children.borrow().iter() {
    let child_clone = clone_subtree(child);
    append_child(&clone, &child_clone);
  }
  clone
}

/// Rename an element in place.
///
/// rcdom element names are immutable, so a replacement node is built with
/// the new tag, the attributes and children are moved over, and the
/// replacement is swapped into the parent at the old position. Returns the
/// replacement handle.
pub fn rename_element(node: &Handle, new_tag: &str) -> Handle {
  let attrs = match &node.data {
    NodeData::Element { attrs, .. } => attrs.borrow().clone(),
    _ => Vec::new(),
  };
  let replacement = Node::new(NodeData::Element {
    name: QualName::new(None, ns!(html), LocalName::from(new_tag)),
    attrs: std::cell::RefCell::new(attrs),
    template_contents: std::cell::RefCell::new(None),
    mathml_annotation_xml_integration_point: false,
  });

  let moved: Vec<Handle> = node.children.borrow_mut().drain(..).collect();
  for child in &moved {
    append_child(&replacement, child);
  }

  if let Some(parent) = parent(node) {
    insert_before(&parent, node, &replacement);
    remove_element(node);
  }
  replacement
}

/// Snapshot of all elements with the given tag name within a subtree, in
/// document order (including `root` itself when it matches).
pub fn elements_by_tag(root: &Handle, name: &str) -> Vec<Handle> {
  let mut out = Vec::new();
  collect_elements(root, name, &mut out);
  out
}

fn collect_elements(node: &Handle, name: &str, out: &mut Vec<Handle>) {
  if matches!(tag_name(node), Some(t) if t.eq_ignore_ascii_case(name)) {
    out.push(node.clone());
  }
  for child in node.children.borrow().iter() {
    collect_elements(child, name, out);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_and_queries_by_tag() {
    let doc = parse_html("<body><div id=a><span>x</span></div><span>y</span></body>");
    let spans = doc.get_elements_by_tag("span");
    assert_eq!(spans.len(), 2);
    assert_eq!(text_content(&spans[0]), "x");
    assert_eq!(text_content(&spans[1]), "y");
    assert!(doc.body().is_some());
  }

  #[test]
  fn remove_element_detaches_subtree() {
    let doc = parse_html("<body><div><span>x</span></div></body>");
    let div = doc.get_elements_by_tag("div").remove(0);
    let span = doc.get_elements_by_tag("span").remove(0);
    remove_element(&div);
    assert!(doc.get_elements_by_tag("span").is_empty());
    assert!(!is_attached(&span, &doc.root()));
    assert!(!is_attached(&div, &doc.root()));
  }

  #[test]
  fn attribute_round_trip_is_case_insensitive() {
    let doc = parse_html("<body><div CLASS='a'></div></body>");
    let div = doc.get_elements_by_tag("div").remove(0);
    assert_eq!(get_attribute(&div, "class").as_deref(), Some("a"));
    set_attribute(&div, "class", "b");
    set_attribute(&div, "data-x", "1");
    assert_eq!(get_attribute(&div, "CLASS").as_deref(), Some("b"));
    remove_attributes(&div, &["class", "data-x"]);
    assert!(attributes(&div).is_empty());
  }

  #[test]
  fn rename_element_keeps_position_attrs_and_children() {
    let doc = parse_html("<body><p>a</p><video width=10><source src=s></video><p>b</p></body>");
    let video = doc.get_elements_by_tag("video").remove(0);
    let renamed = rename_element(&video, "amp-video");
    assert_eq!(tag_name(&renamed), Some("amp-video"));
    assert_eq!(get_attribute(&renamed, "width").as_deref(), Some("10"));
    assert!(child_by_tag(&renamed, "source").is_some());

    let body = doc.body().unwrap();
    let tags: Vec<Option<String>> = children(&body)
      .iter()
      .map(|c| tag_name(c).map(|t| t.to_string()))
      .collect();
    assert_eq!(
      tags,
      vec![
        Some("p".to_string()),
        Some("amp-video".to_string()),
        Some("p".to_string())
      ]
    );
  }

  #[test]
  fn clone_subtree_detaches_copies() {
    let doc = parse_html("<body><font><b>x</b></font></body>");
    let font = doc.get_elements_by_tag("font").remove(0);
    let clone = clone_subtree(&font);
    assert!(parent(&clone).is_none());
    assert_eq!(text_content(&clone), "x");
    // Mutating the clone must not touch the original.
    let b = child_by_tag(&clone, "b").unwrap();
    set_attribute(&b, "class", "copied");
    let original_b = doc.get_elements_by_tag("b").remove(0);
    assert!(get_attribute(&original_b, "class").is_none());
  }

  #[test]
  fn serializes_mutated_tree() {
    let doc = parse_html("<body><div id=a>x</div></body>");
    let div = doc.get_elements_by_tag("div").remove(0);
    set_attribute(&div, "id", "b");
    let html = doc.to_html().expect("serialize");
    assert!(html.contains("id=\"b\""));
  }
}
