//! Feed parser - turns raw feed markup into an ordered list of item nodes.
//!
//! Parsing happens in two steps:
//! 1. Generic markup → [`XmlNode`] tree (attributes kept apart from text)
//! 2. Dialect detection over the tree: RSS, then Atom, then RDF. First match wins.
//!
//! ```text
//! <rss><channel><item/>...</channel></rss>   → FeedFormat::Rss
//! <feed><entry/>...</feed>                   → FeedFormat::Atom
//! <rdf:RDF><item/>...</rdf:RDF>              → FeedFormat::Rdf
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

use crate::common::ImportError;

/// Read capabilities the normalizer needs from a parsed node.
///
/// Extractors are written against this trait rather than the concrete tree so
/// they only ask questions a feed node can answer: "is there text here?",
/// "does it carry this attribute?", "which children have this name?".
pub trait ParsedNode {
    /// Trimmed text content, if any.
    fn text(&self) -> Option<&str>;

    /// Value of a named attribute.
    fn attribute(&self, name: &str) -> Option<&str>;

    /// Direct children with the given qualified name, in document order.
    fn children_named<'a>(&'a self, name: &'a str) -> Box<dyn Iterator<Item = &'a Self> + 'a>;

    /// First direct child with the given qualified name.
    fn child<'a>(&'a self, name: &'a str) -> Option<&'a Self> {
        self.children_named(name).next()
    }
}

/// One element of a parsed feed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ImportError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ImportError::parse(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            text: None,
            children: Vec::new(),
        })
    }

    fn push_text(&mut self, chunk: &str) {
        match &mut self.text {
            Some(text) => text.push_str(chunk),
            None => self.text = Some(chunk.to_string()),
        }
    }

    fn finish(mut self) -> Self {
        self.text = self
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self
    }
}

impl ParsedNode for XmlNode {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn children_named<'a>(&'a self, name: &'a str) -> Box<dyn Iterator<Item = &'a Self> + 'a> {
        Box::new(self.children.iter().filter(move |c| c.name == name))
    }
}

/// Parse markup into a tree rooted at the document element.
pub fn parse_document(xml: &str) -> Result<XmlNode, ImportError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(XmlNode::from_start(&e)?),
            Ok(Event::Empty(e)) => {
                let node = XmlNode::from_start(&e)?.finish();
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ImportError::parse("unexpected closing tag"))?
                    .finish();
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                    current.push_text(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(current) = stack.last_mut() {
                    current.push_text(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ImportError::parse(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(ImportError::parse("unexpected end of document"));
    }
    root.ok_or_else(|| ImportError::parse("document has no root element"))
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), ImportError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(ImportError::parse("multiple root elements")),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Rss,
    Atom,
    Rdf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedMeta {
    pub title: Option<String>,
}

/// Result of parsing a feed: the dialect, its items in document order, and meta.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    pub items: Vec<XmlNode>,
    pub meta: FeedMeta,
}

type Detector = fn(XmlNode) -> Result<ParsedFeed, XmlNode>;

/// Parse raw feed text. Fails with a `PARSE_ERROR` when the markup is broken
/// or no dialect matches.
pub fn parse_feed(raw: &str) -> Result<ParsedFeed, ImportError> {
    let mut document = parse_document(raw)?;

    let detectors: [Detector; 3] = [detect_rss, detect_atom, detect_rdf];
    for detect in detectors {
        match detect(document) {
            Ok(feed) => return Ok(feed),
            Err(unmatched) => document = unmatched,
        }
    }

    Err(ImportError::parse(format!(
        "Unknown feed format: expected RSS, Atom or RDF structure, found <{}>",
        document.name
    )))
}

/// `rss > channel > item`; also accepts a bare `channel` document.
/// Matches only when at least one item is present.
fn detect_rss(mut document: XmlNode) -> Result<ParsedFeed, XmlNode> {
    let channel_index = if document.name == "channel" {
        None
    } else if document.name == "rss" {
        match document.children.iter().position(|c| c.name == "channel") {
            Some(index) => Some(index),
            None => return Err(document),
        }
    } else {
        return Err(document);
    };

    let has_items = match channel_index {
        Some(index) => document.children[index].child("item").is_some(),
        None => document.child("item").is_some(),
    };
    if !has_items {
        return Err(document);
    }

    let channel = match channel_index {
        Some(index) => document.children.swap_remove(index),
        None => document,
    };
    let title = channel.child("title").and_then(|t| t.text()).map(str::to_string);
    Ok(ParsedFeed {
        format: FeedFormat::Rss,
        items: take_children(channel, "item"),
        meta: FeedMeta { title },
    })
}

/// `feed > entry`
fn detect_atom(document: XmlNode) -> Result<ParsedFeed, XmlNode> {
    if document.name != "feed" || document.child("entry").is_none() {
        return Err(document);
    }
    let title = document.child("title").and_then(|t| t.text()).map(str::to_string);
    Ok(ParsedFeed {
        format: FeedFormat::Atom,
        items: take_children(document, "entry"),
        meta: FeedMeta { title },
    })
}

/// `rdf:RDF > item`, with the title living under `channel`.
fn detect_rdf(document: XmlNode) -> Result<ParsedFeed, XmlNode> {
    if document.name != "rdf:RDF" || document.child("item").is_none() {
        return Err(document);
    }
    let title = document
        .child("channel")
        .and_then(|c| c.child("title"))
        .and_then(|t| t.text())
        .map(str::to_string);
    Ok(ParsedFeed {
        format: FeedFormat::Rdf,
        items: take_children(document, "item"),
        meta: FeedMeta { title },
    })
}

fn take_children(node: XmlNode, name: &str) -> Vec<XmlNode> {
    node.children.into_iter().filter(|c| c.name == name).collect()
}
