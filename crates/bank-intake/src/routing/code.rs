use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `DEPT-PROCESS-TYPE`, upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingCode {
    pub department: String,
    pub process: String,
    pub file_type: String,
}

impl RoutingCode {
    /// Builds a code from raw tokens without checking them against any catalog.
    pub fn new(
        department: impl AsRef<str>,
        process: impl AsRef<str>,
        file_type: impl AsRef<str>,
    ) -> Self {
        Self {
            department: normalize(department.as_ref()),
            process: normalize(process.as_ref()),
            file_type: normalize(file_type.as_ref()),
        }
    }
}

pub(crate) fn normalize(token: &str) -> String {
    token.trim().to_ascii_uppercase()
}

impl fmt::Display for RoutingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.department, self.process, self.file_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid routing code '{0}', expected DEPT-PROCESS-TYPE")]
pub struct RoutingCodeParseError(pub String);

impl FromStr for RoutingCode {
    type Err = RoutingCodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        match parts.as_slice() {
            [department, process, file_type]
                if [department, process, file_type]
                    .iter()
                    .all(|part| !part.trim().is_empty()) =>
            {
                Ok(Self::new(department, process, file_type))
            }
            _ => Err(RoutingCodeParseError(s.to_string())),
        }
    }
}

/// Reports the first level of a routing code that the catalog does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("unknown department '{department}', valid: {}", .valid.join(", "))]
    UnknownDepartment {
        department: String,
        valid: Vec<String>,
    },
    #[error("unknown process '{process}' for department '{department}', valid: {}", .valid.join(", "))]
    UnknownProcess {
        department: String,
        process: String,
        valid: Vec<String>,
    },
    #[error("file type '{file_type}' not supported for {department}-{process}, valid: {}", .valid.join(", "))]
    UnsupportedFileType {
        department: String,
        process: String,
        file_type: String,
        valid: Vec<String>,
    },
    #[error("department '{0}' requires approval and cannot own unattended drop files")]
    ApprovalRequiredForDrop(String),
}
