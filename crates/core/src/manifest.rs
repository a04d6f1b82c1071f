//! Manifest XML tree model and the pure tree operations the manifest stage
//! is built from.
//!
//! The model mirrors what structural equality is defined over: tag, ordered
//! attributes, text (after the start tag), tail (after the end tag), and
//! children. quick-xml handles parsing; serialization writes text and tail
//! verbatim, which is what the indentation pass relies on.

use dexcloak_utils::errors::ManifestError;
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

/// One XML element of the manifest tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    /// Tag name as written, including any namespace prefix.
    pub tag: String,
    /// Attributes in document order, keys as written (`android:name`).
    pub attributes: Vec<(String, String)>,
    /// Character data between the start tag and the first child.
    pub text: Option<String>,
    /// Character data between this element's end tag and the next sibling.
    pub tail: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    /// Creates an empty element with the given tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Looks up an attribute by its written key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets or replaces an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// First child with the given tag.
    pub fn find(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// First child with the given tag, mutable.
    pub fn find_mut(&mut self, tag: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.tag == tag)
    }

    /// Parses an XML document and returns its root element. Comments,
    /// processing instructions and the declaration are skipped.
    pub fn parse_document(xml: &str) -> Result<Element, ManifestError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let element = element_from_start(&start)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(end) => {
                    let element = stack.pop().ok_or_else(|| {
                        ManifestError::MismatchedTag(
                            String::from_utf8_lossy(end.name().as_ref()).into_owned(),
                        )
                    })?;
                    if element.tag.as_bytes() != end.name().as_ref() {
                        return Err(ManifestError::MismatchedTag(element.tag));
                    }
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let value = text.unescape()?.into_owned();
                    append_text(&mut stack, value);
                }
                Event::CData(data) => {
                    let value = std::str::from_utf8(data.as_ref())?.to_string();
                    append_text(&mut stack, value);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(ManifestError::UnexpectedEof);
        }
        root.ok_or(ManifestError::NoRoot)
    }

    /// Serializes this element as a full document with an XML declaration.
    pub fn to_document_string(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        write_element(&mut out, self);
        out
    }
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Element, ManifestError> {
    let tag = std::str::from_utf8(start.name().as_ref())?.to_string();
    let mut element = Element::new(tag);
    for attr in start.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

/// Hands a completed element to its parent, or makes it the root.
fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), ManifestError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_some() {
                return Err(ManifestError::MismatchedTag(element.tag));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

/// Routes character data to the open element's text or the previous sibling's
/// tail, concatenating split events.
fn append_text(stack: &mut [Element], value: String) {
    let Some(open) = stack.last_mut() else {
        // Whitespace around the root; dropped.
        return;
    };
    match open.children.last_mut() {
        Some(last_child) => match &mut last_child.tail {
            Some(tail) => tail.push_str(&value),
            None => last_child.tail = Some(value),
        },
        None => match &mut open.text {
            Some(text) => text.push_str(&value),
            None => open.text = Some(value),
        },
    }
}

fn write_element(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(&element.tag);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attribute(value));
        out.push('"');
    }
    if element.text.is_none() && element.children.is_empty() {
        out.push_str(" />");
    } else {
        out.push('>');
        if let Some(text) = &element.text {
            out.push_str(&escape_text(text));
        }
        for child in &element.children {
            write_element(out, child);
        }
        out.push_str("</");
        out.push_str(&element.tag);
        out.push('>');
    }
    if let Some(tail) = &element.tail {
        out.push_str(&escape_text(tail));
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

/// Structural equality: same tag, text, tail (whitespace-insensitive when
/// both sides carry text), attributes regardless of order, and recursively
/// identical children.
pub fn structurally_equal(one: &Element, other: &Element) -> bool {
    if one.tag != other.tag {
        return false;
    }
    if !text_equal(&one.text, &other.text) || !text_equal(&one.tail, &other.tail) {
        return false;
    }
    let one_attrs: BTreeMap<&str, &str> = one
        .attributes
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let other_attrs: BTreeMap<&str, &str> = other
        .attributes
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if one_attrs != other_attrs {
        return false;
    }
    if one.children.len() != other.children.len() {
        return false;
    }
    one.children
        .iter()
        .zip(&other.children)
        .all(|(a, b)| structurally_equal(a, b))
}

fn text_equal(one: &Option<String>, other: &Option<String>) -> bool {
    match (one, other) {
        (Some(a), Some(b)) => a.trim() == b.trim(),
        (a, b) => a == b,
    }
}

/// Removes, depth-first, every child that is structurally identical to an
/// earlier sibling under the same parent. Idempotent.
pub fn remove_duplicates(root: &mut Element) {
    for child in &mut root.children {
        remove_duplicates(child);
    }
    let children = std::mem::take(&mut root.children);
    let mut kept: Vec<Element> = Vec::new();
    for child in children {
        if !kept.iter().any(|k| structurally_equal(k, &child)) {
            kept.push(child);
        }
    }
    root.children = kept;
}

/// Uniformly shuffles the order of every element's children, depth-first.
pub fn scramble(element: &mut Element, rng: &mut StdRng) {
    element.children.shuffle(rng);
    for child in &mut element.children {
        scramble(child, rng);
    }
}

/// Rewrites text and tail for canonical 4-space indentation.
pub fn indent(element: &mut Element) {
    indent_level(element, 0);
}

fn indent_level(element: &mut Element, level: usize) {
    let pad = format!("\n{}", "    ".repeat(level));
    if !element.children.is_empty() {
        if is_blank(&element.text) {
            element.text = Some(format!("{pad}    "));
        }
        if is_blank(&element.tail) {
            element.tail = Some(pad.clone());
        }
        for child in &mut element.children {
            indent_level(child, level + 1);
        }
        // The last child closes at the parent's indentation.
        if let Some(last) = element.children.last_mut() {
            if is_blank(&last.tail) {
                last.tail = Some(pad);
            }
        }
    } else if level > 0 && is_blank(&element.tail) {
        element.tail = Some(pad);
    }
}

fn is_blank(text: &Option<String>) -> bool {
    text.as_deref().is_none_or(|t| t.trim().is_empty())
}

/// Finds the application's main activity: any `<application>` child carrying
/// an intent-filter with the MAIN action and LAUNCHER category. Returns its
/// `android:name`.
pub fn find_main_activity(root: &Element) -> Option<String> {
    let application = root.find("application")?;
    for component in &application.children {
        let Some(filter) = component.find("intent-filter") else {
            continue;
        };
        let (Some(action), Some(category)) = (filter.find("action"), filter.find("category"))
        else {
            continue;
        };
        if action.attr("android:name") == Some("android.intent.action.MAIN")
            && category.attr("android:name") == Some("android.intent.category.LAUNCHER")
        {
            return component.attr("android:name").map(str::to_string);
        }
    }
    None
}
