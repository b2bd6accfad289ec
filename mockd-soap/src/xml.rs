//! A minimal DOM plus the XPath subset the SOAP handler needs: `matchXPath`, `extractXPath`, and
//! `normalizeXPath`. Only one narrow shape is supported —
//! descendant-anywhere lookup for the first path segment, direct-child
//! descent for the rest, and a trailing `@attr` for attribute
//! extraction. There is no generalized XPath engine here, deliberately:
//! expressions like `//GetUser/id`, `//Divide/b`, and `.../@name` are
//! the entire vocabulary operations actually need.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// One parsed XML element. `tag` keeps the prefix as written
/// (`"soap:Body"`); `local_name` has it stripped, for the "namespace
/// stripped" fallback lookups the spec calls for in several places.
#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub local_name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    /// Concatenation of this element's direct text children, trimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let Node::Text(t) = child {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| local_name_of(k) == local)
            .map(|(_, v)| v.as_str())
    }

    /// First descendant (pre-order, self included) whose local name
    /// matches, or `None`.
    pub fn find_descendant(&self, local: &str) -> Option<&Element> {
        if self.local_name == local {
            return Some(self);
        }
        for child in &self.children {
            if let Node::Element(e) = child {
                if let Some(found) = e.find_descendant(local) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// First direct child element with the given local name.
    pub fn find_child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find_map(|c| match c {
            Node::Element(e) if e.local_name == local => Some(e),
            _ => None,
        })
    }

    /// First direct child element, regardless of name.
    pub fn first_child_element(&self) -> Option<&Element> {
        self.children.iter().find_map(|c| match c {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }
}

fn local_name_of(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Parse an XML document into its root element. SOAP envelopes are
/// always well-formed single-root documents; a document with no
/// element at all is the only parse failure this returns.
pub fn parse_document(xml: &str) -> Result<Element, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(build_element(&e)?),
            Ok(Event::Empty(e)) => {
                let el = build_element(&e)?;
                close_element(&mut stack, &mut root, el);
            }
            Ok(Event::End(_)) => {
                if let Some(el) = stack.pop() {
                    close_element(&mut stack, &mut root, el);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| format!("bad text node: {e}"))?
                    .into_owned();
                if !text.trim().is_empty() {
                    if let Some(top) = stack.last_mut() {
                        top.children.push(Node::Text(text));
                    }
                }
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                if let Some(top) = stack.last_mut() {
                    top.children.push(Node::Text(text));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("XML parse error: {e}")),
        }
    }

    root.ok_or_else(|| "document has no root element".to_string())
}

fn close_element(stack: &mut Vec<Element>, root: &mut Option<Element>, el: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(el));
    } else {
        *root = Some(el);
    }
}

fn build_element(e: &quick_xml::events::BytesStart<'_>) -> Result<Element, String> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let local_name = local_name_of(&tag).to_string();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| format!("bad attribute: {e}"))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| format!("bad attribute value: {e}"))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        tag,
        local_name,
        attrs,
        children: Vec::new(),
    })
}

/// Collapse leading slashes and any doubled interior slash into the
/// single-segment-per-slash form the evaluator below expects. `"//a/b"`,
/// `"/a/b"`, and `"a/b"` all normalize to `"a/b"`.
pub fn normalize_xpath(expr: &str) -> String {
    let trimmed = expr.trim().trim_start_matches('/');
    let mut out = String::with_capacity(trimmed.len());
    let mut last_was_slash = false;
    for ch in trimmed.chars() {
        if ch == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
            out.push(ch);
        } else {
            last_was_slash = false;
            out.push(ch);
        }
    }
    out
}

/// Leftmost match's trimmed text, or the attribute value when the
/// expression ends in `/@name`. Empty expression or empty document
/// yields an empty string.
pub fn extract_xpath(doc: &Element, expr: &str) -> String {
    if expr.trim().is_empty() {
        return String::new();
    }
    let normalized = normalize_xpath(expr);
    let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, element_segments)) = segments.split_last() else {
        return String::new();
    };
    let is_attr = last.starts_with('@');
    if element_segments.is_empty() && !is_attr {
        return String::new();
    }

    let path = if is_attr { element_segments } else { &segments[..] };
    let Some((first, rest)) = path.split_first() else {
        return String::new();
    };
    let Some(mut current) = doc.find_descendant(local_name_of(first)) else {
        return String::new();
    };
    for seg in rest {
        match current.find_child(local_name_of(seg)) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }

    if is_attr {
        current.attr(local_name_of(&last[1..])).unwrap_or("").trim().to_string()
    } else {
        current.text()
    }
}

/// Conjunction of text-equality checks across an XPath-to-expected-value
/// map.
pub fn match_xpath(doc: &Element, expected: &HashMap<String, String>) -> bool {
    expected
        .iter()
        .all(|(expr, want)| extract_xpath(doc, expr).trim() == want.trim())
}

/// Escape text for inclusion in an XML text node.
pub fn escape_xml_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}
