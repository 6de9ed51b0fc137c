//! Error envelope decoding
//!
//! Any Ampache response may be an error element instead of an entity list.
//! Two shapes exist across API versions:
//!
//! ```xml
//! <root><error code="401"><![CDATA[Session Expired]]></error></root>
//! <root><error errorCode="4701"><errorAction>artists</errorAction>
//!   <errorMessage>Session Expired</errorMessage></error></root>
//! ```
//!
//! The envelope is extracted from the token stream next to, never instead
//! of, the entity decoders.

use std::fmt;

use crate::xml::XmlToken;

/// Remote fault carried by an error envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFault {
    pub code: u32,
    pub message: String,
}

impl ApiFault {
    /// Extract the first error envelope from a token stream
    pub fn from_tokens(tokens: &[XmlToken]) -> Option<ApiFault> {
        let start = tokens.iter().position(|t| t.is_open("error"))?;
        let code = tokens[start]
            .attr("code")
            .or_else(|| tokens[start].attr("errorCode"))
            .and_then(|c| c.trim().parse().ok())
            .unwrap_or(0);

        let mut message = None;
        for token in &tokens[start + 1..] {
            match token {
                XmlToken::Close { name, text } if name == "errorMessage" => {
                    message = Some(text.clone());
                }
                XmlToken::Close { name, text } if name == "error" => {
                    return Some(ApiFault {
                        code,
                        message: message.unwrap_or_else(|| text.clone()),
                    });
                }
                _ => {}
            }
        }

        Some(ApiFault {
            code,
            message: message.unwrap_or_default(),
        })
    }

    /// The session token is no longer accepted
    pub fn is_session_expired(&self) -> bool {
        matches!(self.code, 401 | 4701)
    }

    /// The requested entity does not exist on the server
    pub fn is_not_found(&self) -> bool {
        matches!(self.code, 404 | 4704)
    }
}

impl fmt::Display for ApiFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::tokenize;

    #[test]
    fn test_legacy_envelope() {
        let tokens = tokenize(
            r#"<root><error code="401"><![CDATA[Session Expired]]></error></root>"#,
        )
        .unwrap();
        let fault = ApiFault::from_tokens(&tokens).unwrap();

        assert_eq!(fault.code, 401);
        assert_eq!(fault.message, "Session Expired");
        assert!(fault.is_session_expired());
        assert!(!fault.is_not_found());
    }

    #[test]
    fn test_structured_envelope() {
        let tokens = tokenize(
            r#"<root><error errorCode="4704">
                <errorAction>artist</errorAction>
                <errorType>filter</errorType>
                <errorMessage>Not Found: 42</errorMessage>
            </error></root>"#,
        )
        .unwrap();
        let fault = ApiFault::from_tokens(&tokens).unwrap();

        assert_eq!(fault.code, 4704);
        assert_eq!(fault.message, "Not Found: 42");
        assert!(fault.is_not_found());
        assert_eq!(fault.to_string(), "Not Found: 42 (4704)");
    }

    #[test]
    fn test_entity_list_has_no_fault() {
        let tokens = tokenize(r#"<root><artist id="1"><name>A</name></artist></root>"#).unwrap();
        assert!(ApiFault::from_tokens(&tokens).is_none());
    }
}
