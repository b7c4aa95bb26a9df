//! Error types for filter and sort parsing

use std::fmt;

/// What went wrong while reading a filter or sort
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("syntax error")]
    Syntax,
    #[error("unsupported operator '{0}'")]
    UnsupportedOperator(String),
    #[error("invalid shape")]
    InvalidShape,
}

/// Error that occurred during parsing
#[derive(Debug, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Field path the error relates to, when known
    pub field: Option<String>,
    pub position: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::Syntax,
            message: message.into(),
            field: None,
            position: None,
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::InvalidShape,
            ..Self::new(message)
        }
    }

    pub fn unsupported_operator(operator: impl Into<String>) -> Self {
        let operator = operator.into();
        Self {
            message: format!("operator '{}' is not supported", operator),
            kind: ParseErrorKind::UnsupportedOperator(operator),
            field: None,
            position: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_position(mut self, pos: usize) -> Self {
        self.position = Some(pos);
        self
    }

    /// The rejected operator, if this is an unsupported-operator error
    pub fn unsupported(&self) -> Option<&str> {
        match &self.kind {
            ParseErrorKind::UnsupportedOperator(op) => Some(op),
            _ => None,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error: {}", self.message)?;
        if let Some(field) = &self.field {
            write!(f, " (field '{}')", field)?;
        }
        if let Some(pos) = self.position {
            write!(f, " at position {}", pos)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

impl From<nom::Err<nom::error::Error<&str>>> for ParseError {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => ParseError::new("Incomplete input"),
            nom::Err::Error(e) | nom::Err::Failure(e) => ParseError::new(format!(
                "Parse error near: {:?}",
                e.input.chars().take(20).collect::<String>()
            )),
        }
    }
}
