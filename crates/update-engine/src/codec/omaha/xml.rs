//! Minimal XML reading and writing on top of quick-xml

use std::collections::BTreeMap;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Result, UpdateError};

/// Writer scoped to one build call
pub(crate) struct DocumentWriter {
    writer: Writer<Vec<u8>>,
}

impl DocumentWriter {
    /// Start a new document with an XML declaration
    pub fn new() -> Result<Self> {
        let mut doc = Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        };
        doc.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(doc)
    }

    pub fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.write(Event::Start(element))
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.write(Event::Empty(element))
    }

    pub fn end(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    pub fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| UpdateError::encode(format!("document is not UTF-8: {}", e)))
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| UpdateError::encode(e.to_string()))
    }
}

/// A parsed element with its attributes and child elements.
///
/// Text content is not retained; the protocol carries everything in attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct XmlElement {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| UpdateError::malformed(format!("invalid UTF-8: {}", e)))
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = utf8(start.local_name().as_ref())?.to_string();

    let mut attributes = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| {
            UpdateError::malformed(format!("bad attribute on <{}>: {}", name, e))
        })?;
        if attr.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let key = utf8(attr.key.local_name().as_ref())?.to_string();
        let value = unescape(utf8(&attr.value)?)
            .map_err(|e| UpdateError::malformed(format!("bad escape in '{}': {}", key, e)))?
            .into_owned();
        attributes.insert(key, value);
    }

    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
    })
}

/// Attaches a finished element to its parent, or makes it the root
fn attach(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(UpdateError::malformed("multiple root elements")),
    }
    Ok(())
}

/// Parse a complete document into its root element
pub(crate) fn parse_document(bytes: &[u8]) -> Result<XmlElement> {
    let text = utf8(bytes)?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if stack.is_empty() && root.is_some() {
                    return Err(UpdateError::malformed("multiple root elements"));
                }
                stack.push(element_from(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let element = element_from(e)?;
                attach(element, &mut stack, &mut root)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| UpdateError::malformed("unbalanced closing tag"))?;
                attach(element, &mut stack, &mut root)?;
            }
            Ok(Event::Text(ref e)) => {
                if stack.is_empty() && !e.iter().all(u8::is_ascii_whitespace) {
                    return Err(UpdateError::malformed("text outside the root element"));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(UpdateError::malformed(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    if !stack.is_empty() {
        return Err(UpdateError::malformed("document ended inside an element"));
    }

    root.ok_or_else(|| UpdateError::malformed("document has no root element"))
}
