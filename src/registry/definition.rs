//! Stream definitions and name validation

use crate::error::{RelayError, Result};

/// Content type served when a stream does not configure one
pub const DEFAULT_CONTENT_TYPE: &str = "video/MP2T";

/// Check that `name` matches `[a-z0-9-]+`
///
/// Anything else, including `.`, `/`, `%` and uppercase letters, is rejected,
/// which also rules out path traversal.
pub fn validate_stream_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');

    if valid {
        Ok(())
    } else {
        Err(RelayError::InvalidStreamName(name.to_string()))
    }
}

/// A configured stream; immutable after startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDefinition {
    /// Stream name, also the URL path segment
    pub name: String,
    /// Upstream source URL handed to the producer
    pub source_url: String,
    /// Content type of the relayed bytes
    pub content_type: String,
}

impl StreamDefinition {
    /// Create a definition, validating the name
    pub fn new(name: impl Into<String>, source_url: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_stream_name(&name)?;

        Ok(Self {
            name,
            source_url: source_url.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        })
    }

    /// Override the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

impl std::fmt::Display for StreamDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.name, self.source_url)
    }
}
