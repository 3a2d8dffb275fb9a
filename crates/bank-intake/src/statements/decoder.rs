use super::model::{FileType, ParsedFile};
use std::fmt::Debug;

/// Failure while turning raw bytes into a [`ParsedFile`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The content does not carry this decoder's signature; a more generic decoder may
    /// still accept it.
    #[error("not a {file_type} file: {reason}")]
    NotThisFormat { file_type: FileType, reason: String },
    #[error("malformed structure: {0}")]
    Structure(String),
    #[error("invalid {field} value '{value}': {reason}")]
    Field {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("unreadable text: {0}")]
    Encoding(String),
}

impl DecodeError {
    pub(crate) fn field(field: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Field {
            field,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn structure(reason: impl Into<String>) -> Self {
        Self::Structure(reason.into())
    }

    pub fn is_wrong_format(&self) -> bool {
        matches!(self, Self::NotThisFormat { .. })
    }
}

/// One statement format. Implementations are stateless and shared by the registry.
pub trait StatementDecoder: Debug + Send + Sync {
    fn file_type(&self) -> FileType;

    fn extensions(&self) -> &'static [&'static str];

    fn description(&self) -> &'static str;

    /// Cheap filename inspection; never touches file content.
    fn can_handle(&self, filename: &str) -> bool {
        has_extension(filename, self.extensions())
    }

    fn decode(&self, source: &str, bytes: &[u8]) -> Result<ParsedFile, DecodeError>;

    /// Structural completeness check, not business validation.
    fn validate(&self, parsed: &ParsedFile) -> bool {
        parsed.file_type() == self.file_type()
            && parsed
                .statements()
                .iter()
                .all(|statement| !statement.account_id.trim().is_empty())
            && parsed.is_consistent()
    }
}

pub(crate) fn has_extension(filename: &str, extensions: &[&str]) -> bool {
    let lower = filename.to_ascii_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

pub(crate) fn utf8_text(bytes: &[u8]) -> Result<&str, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|err| DecodeError::Encoding(err.to_string()))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}
