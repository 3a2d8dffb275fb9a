use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier used when a source format omits one.
pub const UNKNOWN_ACCOUNT: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileType {
    #[serde(rename = "MT940")]
    Mt940,
    #[serde(rename = "CAMT053")]
    Camt053,
    #[serde(rename = "BAI2")]
    Bai2,
    #[serde(rename = "CSV")]
    Csv,
}

impl FileType {
    pub const fn ordered() -> [Self; 4] {
        [Self::Mt940, Self::Camt053, Self::Bai2, Self::Csv]
    }

    /// Token used for this format inside routing codes.
    pub const fn routing_token(self) -> &'static str {
        match self {
            Self::Mt940 => "MT940",
            Self::Camt053 => "CAMT053",
            Self::Bai2 => "BAI2",
            Self::Csv => "CSV",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Mt940 => "SWIFT MT940",
            Self::Camt053 => "ISO 20022 camt.053",
            Self::Bai2 => "BAI2",
            Self::Csv => "Delimited text",
        }
    }

    /// Currency assumed when a transaction and its statement carry none.
    pub const fn default_currency(self) -> &'static str {
        match self {
            Self::Camt053 => "XXX",
            Self::Mt940 | Self::Bai2 | Self::Csv => "USD",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub amount: Decimal,
    pub currency: String,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<NaiveDate>,
    /// Negative for debits, positive for credits.
    pub amount: Decimal,
    pub currency: String,
    pub reference: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalStatement {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_balance: Option<Balance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_balance: Option<Balance>,
    pub transactions: Vec<CanonicalTransaction>,
}

impl CanonicalStatement {
    pub fn new(account_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        let account_id = if account_id.trim().is_empty() {
            UNKNOWN_ACCOUNT.to_string()
        } else {
            account_id.trim().to_string()
        };

        Self {
            account_id,
            statement_number: None,
            opening_balance: None,
            closing_balance: None,
            transactions: Vec::new(),
        }
    }

    pub fn net_amount(&self) -> Decimal {
        self.transactions.iter().map(|tx| tx.amount).sum()
    }
}

/// Sum of every transaction amount across the given statements.
pub fn total_amount(statements: &[CanonicalStatement]) -> Decimal {
    statements.iter().map(CanonicalStatement::net_amount).sum()
}

/// A decoded file. The aggregates are derived from the statements when the value is built
/// (or deserialized) and the statements cannot be changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ParsedFileRecord")]
pub struct ParsedFile {
    file_type: FileType,
    source: String,
    parsed_at: DateTime<Utc>,
    statements: Vec<CanonicalStatement>,
    total_transactions: usize,
    total_amount: Decimal,
}

impl ParsedFile {
    pub fn new(
        file_type: FileType,
        source: impl Into<String>,
        statements: Vec<CanonicalStatement>,
    ) -> Self {
        Self::at(file_type, source, Utc::now(), statements)
    }

    pub fn at(
        file_type: FileType,
        source: impl Into<String>,
        parsed_at: DateTime<Utc>,
        statements: Vec<CanonicalStatement>,
    ) -> Self {
        let total_transactions = statements.iter().map(|s| s.transactions.len()).sum();
        let total_amount = total_amount(&statements);
        Self {
            file_type,
            source: source.into(),
            parsed_at,
            statements,
            total_transactions,
            total_amount,
        }
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parsed_at(&self) -> DateTime<Utc> {
        self.parsed_at
    }

    pub fn statements(&self) -> &[CanonicalStatement] {
        &self.statements
    }

    pub fn total_transactions(&self) -> usize {
        self.total_transactions
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn transactions(&self) -> impl Iterator<Item = &CanonicalTransaction> {
        self.statements.iter().flat_map(|s| s.transactions.iter())
    }

    /// Re-scans the statements and compares against the stored aggregates.
    pub fn is_consistent(&self) -> bool {
        let count: usize = self.statements.iter().map(|s| s.transactions.len()).sum();
        count == self.total_transactions && total_amount(&self.statements) == self.total_amount
    }

    pub fn summary(&self) -> ProcessingSummary {
        ProcessingSummary {
            file_type: self.file_type,
            statements: self.statements.len(),
            transactions: self.total_transactions,
            total_amount: self.total_amount,
        }
    }
}

#[derive(Deserialize)]
struct ParsedFileRecord {
    file_type: FileType,
    source: String,
    parsed_at: DateTime<Utc>,
    statements: Vec<CanonicalStatement>,
}

impl From<ParsedFileRecord> for ParsedFile {
    fn from(record: ParsedFileRecord) -> Self {
        ParsedFile::at(
            record.file_type,
            record.source,
            record.parsed_at,
            record.statements,
        )
    }
}

/// Aggregate figures recorded against a job once its file has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub file_type: FileType,
    pub statements: usize,
    pub transactions: usize,
    pub total_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transaction(amount: Decimal) -> CanonicalTransaction {
        CanonicalTransaction {
            date: NaiveDate::from_ymd_opt(2024, 1, 5),
            value_date: None,
            amount,
            currency: "CHF".to_string(),
            reference: String::new(),
            description: String::new(),
            type_code: None,
        }
    }

    #[test]
    fn blank_account_falls_back_to_sentinel() {
        assert_eq!(CanonicalStatement::new("  ").account_id, UNKNOWN_ACCOUNT);
        assert_eq!(CanonicalStatement::new(" CH93 ").account_id, "CH93");
    }

    #[test]
    fn aggregates_follow_statements() {
        let mut first = CanonicalStatement::new("A");
        first.transactions.push(transaction(dec!(100.50)));
        first.transactions.push(transaction(dec!(-20.25)));
        let mut second = CanonicalStatement::new("B");
        second.transactions.push(transaction(dec!(0.75)));

        let parsed = ParsedFile::new(FileType::Csv, "in.csv", vec![first, second]);

        assert_eq!(parsed.total_transactions(), 3);
        assert_eq!(parsed.total_amount(), dec!(81.00));
        assert!(parsed.is_consistent());
        assert_eq!(parsed.summary().statements, 2);
    }

    #[test]
    fn deserialization_recomputes_aggregates() {
        let mut statement = CanonicalStatement::new("A");
        statement.transactions.push(transaction(dec!(12.00)));
        let parsed = ParsedFile::new(FileType::Mt940, "a.940", vec![statement]);

        let mut value = serde_json::to_value(&parsed).expect("serializes");
        value["total_transactions"] = serde_json::json!(99);
        value["total_amount"] = serde_json::json!("1000");

        let restored: ParsedFile = serde_json::from_value(value).expect("deserializes");
        assert_eq!(restored.total_transactions(), 1);
        assert_eq!(restored.total_amount(), dec!(12.00));
    }

    #[test]
    fn file_type_tokens_match_serde_names() {
        for file_type in FileType::ordered() {
            let json = serde_json::to_string(&file_type).expect("serializes");
            assert_eq!(json, format!("\"{}\"", file_type.routing_token()));
        }
    }
}
