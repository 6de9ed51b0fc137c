//! XML token stream
//!
//! Responses are read in full and flattened into a list of element open and
//! close tokens before any entity is decoded. Each close token carries the
//! trimmed text written directly inside that element, so decoders never need
//! to track text buffers themselves. Malformed documents fail here, before a
//! decoder touches the library.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{AmpacheError, Result};

/// One element boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlToken {
    Open {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Close {
        name: String,
        /// Direct text content, trimmed; CDATA sections included
        text: String,
    },
}

impl XmlToken {
    pub fn name(&self) -> &str {
        match self {
            XmlToken::Open { name, .. } | XmlToken::Close { name, .. } => name,
        }
    }

    /// Attribute value of an open token
    pub fn attr(&self, key: &str) -> Option<&str> {
        match self {
            XmlToken::Open { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            XmlToken::Close { .. } => None,
        }
    }

    pub fn is_open(&self, tag: &str) -> bool {
        matches!(self, XmlToken::Open { name, .. } if name == tag)
    }

    pub fn is_close(&self, tag: &str) -> bool {
        matches!(self, XmlToken::Close { name, .. } if name == tag)
    }
}

/// Flatten an XML document into open/close tokens
pub fn tokenize(body: &str) -> Result<Vec<XmlToken>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(false);

    let mut tokens = Vec::new();
    let mut stack: Vec<(String, String)> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| xml_error(&reader, e.to_string()))?;

        match event {
            Event::Start(start) => {
                let (name, attrs) = open_parts(&start)?;
                tokens.push(XmlToken::Open {
                    name: name.clone(),
                    attrs,
                });
                stack.push((name, String::new()));
            }
            Event::Empty(start) => {
                let (name, attrs) = open_parts(&start)?;
                tokens.push(XmlToken::Open {
                    name: name.clone(),
                    attrs,
                });
                tokens.push(XmlToken::Close {
                    name,
                    text: String::new(),
                });
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                match stack.pop() {
                    Some((open, text)) if open == name => tokens.push(XmlToken::Close {
                        name,
                        text: text.trim().to_string(),
                    }),
                    _ => return Err(xml_error(&reader, format!("unexpected </{name}>"))),
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| xml_error(&reader, e.to_string()))?;
                if let Some((_, buffer)) = stack.last_mut() {
                    buffer.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some((_, buffer)) = stack.last_mut() {
                    buffer.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some((name, _)) = stack.last() {
        return Err(AmpacheError::Xml(format!("unclosed element <{name}>")));
    }

    Ok(tokens)
}

/// Text of the first element with the given tag
pub fn text_of<'a>(tokens: &'a [XmlToken], tag: &str) -> Option<&'a str> {
    tokens.iter().find_map(|token| match token {
        XmlToken::Close { name, text } if name == tag => Some(text.as_str()),
        _ => None,
    })
}

fn open_parts(start: &BytesStart<'_>) -> Result<(String, Vec<(String, String)>)> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| AmpacheError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| AmpacheError::Xml(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok((name, attrs))
}

fn xml_error(reader: &Reader<&[u8]>, message: String) -> AmpacheError {
    AmpacheError::Xml(format!("{message} at byte {}", reader.buffer_position()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTISTS: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<root>
    <total_count>1</total_count>
    <artist id="12">
        <name><![CDATA[Alice Coltrane]]></name>
        <genre id="3">Jazz</genre>
        <albumcount>4</albumcount>
        <art/>
    </artist>
</root>"#;

    #[test]
    fn test_tokenize_entities() {
        let tokens = tokenize(ARTISTS).unwrap();

        assert!(tokens[0].is_open("root"));
        let artist = tokens.iter().find(|t| t.is_open("artist")).unwrap();
        assert_eq!(artist.attr("id"), Some("12"));
        assert_eq!(artist.attr("missing"), None);

        assert_eq!(text_of(&tokens, "name"), Some("Alice Coltrane"));
        assert_eq!(text_of(&tokens, "genre"), Some("Jazz"));
        assert_eq!(text_of(&tokens, "albumcount"), Some("4"));
        assert_eq!(text_of(&tokens, "art"), Some(""));

        let genre = tokens.iter().find(|t| t.is_open("genre")).unwrap();
        assert_eq!(genre.attr("id"), Some("3"));
        assert!(tokens.last().unwrap().is_close("root"));
    }

    #[test]
    fn test_parent_text_excludes_children() {
        let tokens = tokenize("<a>outer<b>inner</b></a>").unwrap();
        assert_eq!(text_of(&tokens, "b"), Some("inner"));
        assert_eq!(text_of(&tokens, "a"), Some("outer"));
    }

    #[test]
    fn test_entities_are_unescaped() {
        let tokens = tokenize(r#"<song title="Tom &amp; Jerry">Rock &amp; Roll</song>"#).unwrap();
        assert_eq!(tokens[0].attr("title"), Some("Tom & Jerry"));
        assert_eq!(text_of(&tokens, "song"), Some("Rock & Roll"));
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        assert!(matches!(
            tokenize("<root><artist id=\"1\"></root>"),
            Err(AmpacheError::Xml(_))
        ));
        assert!(matches!(tokenize("<root><artist>"), Err(AmpacheError::Xml(_))));
    }

    #[test]
    fn test_empty_document() {
        assert!(tokenize("").unwrap().is_empty());
    }
}
