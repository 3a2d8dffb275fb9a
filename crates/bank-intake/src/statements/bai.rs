//! BAI2 cash management balance reports.
//!
//! Record codes: `02` group header (as-of date), `03` account identifier (opens a
//! statement), `16` transaction detail, `88` continuation. Everything else is skipped.

use super::decoder::{has_extension, utf8_text, DecodeError, StatementDecoder};
use super::model::{CanonicalStatement, CanonicalTransaction, FileType, ParsedFile};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

const EXTENSIONS: &[&str] = &[".bai", ".bai2", ".txt"];

/// Detail type codes in this range are debits.
const DEBIT_TYPE_CODES: std::ops::RangeInclusive<u16> = 400..=699;

#[derive(Debug, Default, Clone, Copy)]
pub struct Bai2Decoder;

impl StatementDecoder for Bai2Decoder {
    fn file_type(&self) -> FileType {
        FileType::Bai2
    }

    fn extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn description(&self) -> &'static str {
        "BAI2 bank administration balance report"
    }

    fn can_handle(&self, filename: &str) -> bool {
        has_extension(filename, EXTENSIONS) && filename.to_ascii_lowercase().contains("bai")
    }

    fn decode(&self, source: &str, bytes: &[u8]) -> Result<ParsedFile, DecodeError> {
        let text = utf8_text(bytes)?;
        let mut statements = Vec::new();
        let mut open: Option<OpenAccount> = None;
        let mut as_of: Option<NaiveDate> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let fields = split_record(line);
            match fields[0] {
                "02" => as_of = fields.get(4).and_then(|raw| parse_as_of(raw)),
                "03" => {
                    if let Some(done) = open.take() {
                        statements.push(done.statement);
                    }
                    open = Some(OpenAccount::new(&fields));
                }
                "16" => {
                    let Some(account) = open.as_mut() else {
                        debug!(line = index + 1, "skipping BAI2 detail outside an account");
                        continue;
                    };
                    if fields.len() < 4 {
                        debug!(line = index + 1, "skipping short BAI2 detail record");
                        continue;
                    }
                    account.push_detail(&fields, as_of)?;
                }
                "88" => {
                    if let Some(account) = open.as_mut() {
                        account.continue_text(&fields[1..]);
                    }
                }
                _ => {}
            }
        }

        if let Some(done) = open.take() {
            statements.push(done.statement);
        }

        Ok(ParsedFile::new(FileType::Bai2, source, statements))
    }
}

#[derive(Debug)]
struct OpenAccount {
    statement: CanonicalStatement,
    currency: String,
    continues_detail: bool,
}

impl OpenAccount {
    fn new(fields: &[&str]) -> Self {
        let account = fields.get(1).copied().unwrap_or_default();
        let currency = fields
            .get(2)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .unwrap_or(FileType::Bai2.default_currency())
            .to_string();

        Self {
            statement: CanonicalStatement::new(account),
            currency,
            continues_detail: false,
        }
    }

    /// `16,type,amount,funds type,bank reference,customer reference,text`
    fn push_detail(&mut self, fields: &[&str], as_of: Option<NaiveDate>) -> Result<(), DecodeError> {
        let type_code = fields[1].trim();
        let magnitude = parse_amount(fields[2])?;
        let debit = type_code
            .parse::<u16>()
            .map(|code| DEBIT_TYPE_CODES.contains(&code))
            .unwrap_or(false);

        let bank_reference = fields.get(4).map(|v| v.trim()).unwrap_or_default();
        let customer_reference = fields.get(5).map(|v| v.trim()).unwrap_or_default();
        let reference = if bank_reference.is_empty() {
            customer_reference
        } else {
            bank_reference
        };
        let description = fields
            .get(6..)
            .map(|rest| rest.join(",").trim().to_string())
            .unwrap_or_default();

        self.statement.transactions.push(CanonicalTransaction {
            date: as_of,
            value_date: None,
            amount: if debit { -magnitude } else { magnitude },
            currency: self.currency.clone(),
            reference: reference.to_string(),
            description,
            type_code: Some(type_code.to_string()).filter(|code| !code.is_empty()),
        });
        self.continues_detail = true;
        Ok(())
    }

    fn continue_text(&mut self, fields: &[&str]) {
        if !self.continues_detail {
            return;
        }
        let Some(last) = self.statement.transactions.last_mut() else {
            return;
        };
        let extra = fields.join(",");
        let extra = extra.trim();
        if extra.is_empty() {
            return;
        }
        if !last.description.is_empty() {
            last.description.push(' ');
        }
        last.description.push_str(extra);
    }
}

/// Splits a record on commas after dropping the `/` record terminator.
fn split_record(line: &str) -> Vec<&str> {
    let body = line.strip_suffix('/').unwrap_or(line);
    body.split(',').collect()
}

/// Amounts without a decimal point carry two implied decimals.
fn parse_amount(raw: &str) -> Result<Decimal, DecodeError> {
    let trimmed = raw.trim().trim_start_matches('+');
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    if trimmed.contains('.') {
        return Decimal::from_str(trimmed).map_err(|err| DecodeError::field("amount", raw, err));
    }
    let minor = trimmed
        .parse::<i64>()
        .map_err(|err| DecodeError::field("amount", raw, err))?;
    Ok(Decimal::new(minor, 2))
}

fn parse_as_of(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TWO_ACCOUNTS: &str = "01,BANKUS33,ACME,240105,0800,1,,,2/\n\
02,ACME,BANKUS33,1,240105,0800,USD,2/\n\
03,111222333,USD,010,500000,,/\n\
16,165,150000,Z,BR-1,CR-1,Customer deposit/\n\
88,second line/\n\
16,475,2500,Z,BR-2,,Check 1001/\n\
49,147500,4/\n\
03,444555666,EUR,010,100,,/\n\
16,195,12.34,Z,,CR-9,Wire in/\n\
49,1234,2/\n\
98,148734,2,9/\n\
99,148734,1,11/\n";

    #[test]
    fn account_record_flushes_previous_statement() {
        let parsed = Bai2Decoder
            .decode("daily.bai2", TWO_ACCOUNTS.as_bytes())
            .expect("decodes");

        assert_eq!(parsed.statements().len(), 2);
        let first = &parsed.statements()[0];
        assert_eq!(first.account_id, "111222333");
        assert_eq!(first.transactions.len(), 2);
        assert_eq!(first.transactions[0].amount, dec!(1500.00));
        assert_eq!(first.transactions[0].description, "Customer deposit second line");
        assert_eq!(first.transactions[0].date, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(first.transactions[1].amount, dec!(-25.00));
        assert_eq!(first.transactions[1].reference, "BR-2");

        let second = &parsed.statements()[1];
        assert_eq!(second.account_id, "444555666");
        assert_eq!(second.transactions[0].currency, "EUR");
        assert_eq!(second.transactions[0].amount, dec!(12.34));
        assert_eq!(second.transactions[0].reference, "CR-9");
        assert!(Bai2Decoder.validate(&parsed));
    }

    #[test]
    fn end_of_input_flushes_open_statement() {
        let text = "03,ACC-1,USD/\n16,165,100,Z,R1/\n";
        let parsed = Bai2Decoder.decode("open.bai", text.as_bytes()).expect("decodes");
        assert_eq!(parsed.statements().len(), 1);
        assert_eq!(parsed.total_transactions(), 1);
    }

    #[test]
    fn short_and_orphan_details_are_skipped() {
        let text = "16,165,100,Z/\n03,ACC-1,,/\n16,165/\n16,165,200,Z/\n";
        let parsed = Bai2Decoder.decode("skip.bai", text.as_bytes()).expect("decodes");
        assert_eq!(parsed.total_transactions(), 1);
        assert_eq!(parsed.total_amount(), dec!(2.00));
        assert_eq!(parsed.statements()[0].transactions[0].currency, "USD");
    }

    #[test]
    fn unparseable_amount_is_field_error() {
        let err = Bai2Decoder
            .decode("bad.bai", b"03,ACC,USD/\n16,165,12x,Z/\n")
            .expect_err("rejects");
        assert!(matches!(err, DecodeError::Field { field: "amount", .. }));
    }

    #[test]
    fn claims_only_bai_named_files() {
        assert!(Bai2Decoder.can_handle("bank_bai_0105.txt"));
        assert!(Bai2Decoder.can_handle("ledger.BAI2"));
        assert!(!Bai2Decoder.can_handle("notes.txt"));
    }
}
