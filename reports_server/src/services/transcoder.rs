//! JUnit XML → summary document.
//!
//! The report is parsed into a plain element/attribute tree and the summary is
//! rebuilt from the root `testsuite` attributes. Test cases are not read.

use std::collections::BTreeMap;

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::models::summary::{SummaryDocument, TIMESTAMP_FORMAT};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attribute(#[from] AttrError),

    #[error("non UTF-8 element or attribute name: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("document has no root element")]
    NoRoot,

    #[error("document has more than one root element")]
    MultipleRoots,

    #[error("closing tag without matching opening tag")]
    UnbalancedEnd,

    #[error("document ends inside <{0}>")]
    Unterminated(String),
}

/// An element with its attributes and child elements; text is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, TranscodeError> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut attributes = BTreeMap::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            attributes.insert(key, value);
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    /// Attribute value, or empty when absent.
    pub fn attr_or_empty(&self, name: &str) -> String {
        self.attributes.get(name).cloned().unwrap_or_default()
    }
}

/// Parse a whole document into its root element.
pub fn parse_tree(xml: &[u8]) -> Result<XmlElement, TranscodeError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut open: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                if open.is_empty() && root.is_some() {
                    return Err(TranscodeError::MultipleRoots);
                }
                open.push(XmlElement::from_start(&start)?);
            }
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start)?;
                attach(&mut open, &mut root, element)?;
            }
            Event::End(_) => {
                let element = open.pop().ok_or(TranscodeError::UnbalancedEnd)?;
                attach(&mut open, &mut root, element)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(unclosed) = open.pop() {
        return Err(TranscodeError::Unterminated(unclosed.name));
    }
    root.ok_or(TranscodeError::NoRoot)
}

fn attach(
    open: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), TranscodeError> {
    match open.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => return Err(TranscodeError::MultipleRoots),
        None => *root = Some(element),
    }
    Ok(())
}

/// Build the summary document for one uploaded report.
pub fn to_summary(
    xml: &[u8],
    org: &str,
    app: &str,
    version: &str,
) -> Result<SummaryDocument, TranscodeError> {
    let tree = parse_tree(xml)?;
    let empty = XmlElement::default();
    let suite = if tree.name == "testsuite" {
        &tree
    } else {
        &empty
    };

    Ok(SummaryDocument {
        org: org.to_string(),
        app: app.to_string(),
        version: version.to_string(),
        timestamp: chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        testsuite_name: suite.attr_or_empty("name"),
        tests: suite.attr_or_empty("tests"),
        failures: suite.attr_or_empty("failures"),
        errors: suite.attr_or_empty("errors"),
        skipped_tests: suite.attr_or_empty("skipped"),
        time: suite.attr_or_empty("time"),
    })
}
