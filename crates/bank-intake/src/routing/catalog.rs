use super::code::{normalize, RoutingCode, RoutingError};
use crate::statements::FileType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!(
                "unknown priority '{other}', valid: LOW, NORMAL, HIGH, CRITICAL"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessDefinition {
    pub code: &'static str,
    pub file_types: Vec<&'static str>,
}

impl ProcessDefinition {
    fn permits(&self, file_type: &str) -> bool {
        self.file_types.iter().any(|candidate| *candidate == file_type)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DepartmentDefinition {
    pub code: &'static str,
    pub name: &'static str,
    pub default_priority: Priority,
    pub requires_approval: bool,
    pub processes: Vec<ProcessDefinition>,
}

impl DepartmentDefinition {
    pub fn process(&self, code: &str) -> Option<&ProcessDefinition> {
        self.processes.iter().find(|process| process.code == code)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTypeDefinition {
    pub code: &'static str,
    pub description: &'static str,
    pub extensions: Vec<&'static str>,
}

/// Which departments exist, what processes they run, and which file types each process
/// accepts. Built once and handed to whoever needs it.
#[derive(Debug, Clone)]
pub struct RoutingCatalog {
    departments: Vec<DepartmentDefinition>,
    file_types: Vec<FileTypeDefinition>,
}

impl RoutingCatalog {
    pub fn standard() -> Self {
        Self {
            departments: standard_departments(),
            file_types: standard_file_types(),
        }
    }

    pub fn departments(&self) -> &[DepartmentDefinition] {
        &self.departments
    }

    pub fn file_types(&self) -> &[FileTypeDefinition] {
        &self.file_types
    }

    pub fn department(&self, code: &str) -> Option<&DepartmentDefinition> {
        let code = normalize(code);
        self.departments
            .iter()
            .find(|department| department.code == code)
    }

    pub fn require_department(
        &self,
        department: &str,
    ) -> Result<&DepartmentDefinition, RoutingError> {
        self.department(department)
            .ok_or_else(|| RoutingError::UnknownDepartment {
                department: normalize(department),
                valid: self.departments.iter().map(|d| d.code.to_string()).collect(),
            })
    }

    fn knows_file_type(&self, code: &str) -> bool {
        self.file_types.iter().any(|file_type| file_type.code == code)
    }

    /// Checks department, then process, then file type. Never fails loudly.
    pub fn validate(&self, code: &RoutingCode) -> bool {
        self.resolve(&code.department, &code.process, &code.file_type)
            .is_ok()
    }

    /// Upper-cases the tokens and reports the first level the catalog rejects.
    pub fn build_routing_code(
        &self,
        department: &str,
        process: &str,
        file_type: &str,
    ) -> Result<RoutingCode, RoutingError> {
        self.resolve(department, process, file_type)
    }

    fn resolve(
        &self,
        department: &str,
        process: &str,
        file_type: &str,
    ) -> Result<RoutingCode, RoutingError> {
        let code = RoutingCode::new(department, process, file_type);

        let definition = self.require_department(&code.department)?;

        let Some(process) = definition.process(&code.process) else {
            return Err(RoutingError::UnknownProcess {
                department: code.department,
                process: code.process,
                valid: definition
                    .processes
                    .iter()
                    .map(|p| p.code.to_string())
                    .collect(),
            });
        };

        if !process.permits(&code.file_type) || !self.knows_file_type(&code.file_type) {
            return Err(RoutingError::UnsupportedFileType {
                valid: process.file_types.iter().map(|f| f.to_string()).collect(),
                department: code.department,
                process: code.process,
                file_type: code.file_type,
            });
        }

        Ok(code)
    }

    /// Every valid `DEPT-PROCESS-TYPE` combination, in catalog order.
    pub fn routing_codes(&self) -> Vec<RoutingCode> {
        self.departments
            .iter()
            .flat_map(|department| {
                department.processes.iter().flat_map(move |process| {
                    process
                        .file_types
                        .iter()
                        .map(move |file_type| RoutingCode::new(department.code, process.code, file_type))
                })
            })
            .collect()
    }

    /// Code for a file arriving without an upload, owned by `department`'s first process
    /// that accepts `file_type`.
    pub fn first_process_for(&self, department: &str, file_type: FileType) -> Option<RoutingCode> {
        let definition = self.department(department)?;
        let token = file_type.routing_token();
        definition
            .processes
            .iter()
            .find(|process| process.permits(token))
            .map(|process| RoutingCode::new(definition.code, process.code, token))
    }

    /// Confirms `department` may own unattended drop files: it must exist and must not
    /// require approval.
    pub fn check_drop_department(
        &self,
        department: &str,
    ) -> Result<&DepartmentDefinition, RoutingError> {
        let definition = self.require_department(department)?;
        if definition.requires_approval {
            return Err(RoutingError::ApprovalRequiredForDrop(
                definition.code.to_string(),
            ));
        }
        Ok(definition)
    }
}

impl Default for RoutingCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn process(code: &'static str, file_types: &[&'static str]) -> ProcessDefinition {
    ProcessDefinition {
        code,
        file_types: file_types.to_vec(),
    }
}

fn standard_departments() -> Vec<DepartmentDefinition> {
    vec![
        DepartmentDefinition {
            code: "HR",
            name: "Human Resources",
            default_priority: Priority::Normal,
            requires_approval: false,
            processes: vec![
                process("PAYROLL", &["CSV", "MT940"]),
                process("BENEFITS", &["CSV"]),
                process("ONBOARDING", &["CSV"]),
            ],
        },
        DepartmentDefinition {
            code: "FINANCE",
            name: "Finance Department",
            default_priority: Priority::High,
            requires_approval: true,
            processes: vec![
                process("PAYMENT", &["MT940", "CAMT053", "PAIN001"]),
                process("ACCOUNTING", &["CSV", "BAI2"]),
                process("BUDGETING", &["CSV"]),
            ],
        },
        DepartmentDefinition {
            code: "TREASURY",
            name: "Treasury Operations",
            default_priority: Priority::Critical,
            requires_approval: true,
            processes: vec![
                process("TRADE", &["CAMT053", "BAI2"]),
                process("CASHFLOW", &["MT940", "BAI2"]),
                process("FOREX", &["CAMT053"]),
            ],
        },
        DepartmentDefinition {
            code: "COMPLIANCE",
            name: "Compliance & Risk",
            default_priority: Priority::High,
            requires_approval: true,
            processes: vec![
                process("AUDIT", &["BAI2", "CSV"]),
                process("REPORTING", &["CSV", "MT940"]),
                process("MONITORING", &["CAMT053", "CSV"]),
            ],
        },
        DepartmentDefinition {
            code: "OPERATIONS",
            name: "Operations",
            default_priority: Priority::Normal,
            requires_approval: false,
            processes: vec![
                process("SETTLEMENT", &["PAIN001", "PAIN002"]),
                process("CLEARING", &["BAI2", "CAMT053"]),
                process("RECONCILE", &["CSV", "MT940"]),
            ],
        },
    ]
}

fn file_type(
    code: &'static str,
    description: &'static str,
    extensions: &[&'static str],
) -> FileTypeDefinition {
    FileTypeDefinition {
        code,
        description,
        extensions: extensions.to_vec(),
    }
}

fn standard_file_types() -> Vec<FileTypeDefinition> {
    vec![
        file_type("MT940", "SWIFT bank statement", &[".mt940", ".940"]),
        file_type("CAMT053", "ISO 20022 cash management statement", &[".xml"]),
        file_type("BAI2", "Bank Administration Institute balance report", &[".bai", ".bai2"]),
        file_type("CSV", "Generic delimited bank export", &[".csv"]),
        file_type("PAIN001", "ISO 20022 payment initiation", &[".xml"]),
        file_type("PAIN002", "ISO 20022 payment status report", &[".xml"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_uppercases_tokens() {
        let catalog = RoutingCatalog::standard();
        let code = catalog
            .build_routing_code("finance", "Payment", "camt053")
            .expect("valid");
        assert_eq!(code.to_string(), "FINANCE-PAYMENT-CAMT053");
    }

    #[test]
    fn drop_files_route_to_first_permitting_process() {
        let catalog = RoutingCatalog::standard();
        let code = catalog
            .first_process_for("OPERATIONS", FileType::Mt940)
            .expect("routable");
        assert_eq!(code.to_string(), "OPERATIONS-RECONCILE-MT940");
        let code = catalog
            .first_process_for("OPERATIONS", FileType::Bai2)
            .expect("routable");
        assert_eq!(code.process, "CLEARING");
        assert!(catalog.first_process_for("HR", FileType::Bai2).is_none());
    }

    #[test]
    fn approval_departments_cannot_own_drop_files() {
        let catalog = RoutingCatalog::standard();
        assert!(catalog.check_drop_department("operations").is_ok());
        assert_eq!(
            catalog.check_drop_department("TREASURY").unwrap_err(),
            RoutingError::ApprovalRequiredForDrop("TREASURY".to_string())
        );
        assert!(matches!(
            catalog.check_drop_department("SALES"),
            Err(RoutingError::UnknownDepartment { .. })
        ));
    }

    #[test]
    fn every_listed_code_validates() {
        let catalog = RoutingCatalog::standard();
        let codes = catalog.routing_codes();
        assert_eq!(codes.len(), 27);
        assert!(codes.iter().all(|code| catalog.validate(code)));
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("critical".parse::<Priority>(), Ok(Priority::Critical));
        assert!("urgent".parse::<Priority>().is_err());
    }
}
