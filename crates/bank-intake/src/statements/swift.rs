//! SWIFT MT940 customer statements.
//!
//! Tags handled: `:20:` (opens a statement), `:25:`, `:28C:`, `:60F:`/`:60M:`, `:61:`,
//! `:86:`, `:62F:`/`:62M:`. Other tags are accepted and ignored.

use super::decoder::{utf8_text, DecodeError, StatementDecoder};
use super::model::{Balance, CanonicalStatement, CanonicalTransaction, FileType, ParsedFile};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::debug;

const EXTENSIONS: &[&str] = &[".mt940", ".mt9", ".940"];

const STATEMENT_LINE: &str = r"^(?P<value>\d{6})(?P<entry>\d{4})?(?P<mark>R?[CD])(?P<funds>[A-Z])?(?P<amount>\d[\d,]*)(?P<kind>[A-Z][A-Z0-9]{3})(?P<customer>.*?)(?://(?P<bank>.*))?$";

#[derive(Debug, Default, Clone, Copy)]
pub struct Mt940Decoder;

impl StatementDecoder for Mt940Decoder {
    fn file_type(&self) -> FileType {
        FileType::Mt940
    }

    fn extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn description(&self) -> &'static str {
        "SWIFT MT940 customer statement"
    }

    fn decode(&self, source: &str, bytes: &[u8]) -> Result<ParsedFile, DecodeError> {
        let text = utf8_text(bytes)?;
        let fields = split_fields(text)?;
        let statement_line = statement_line_re()
            .as_ref()
            .map_err(|err| DecodeError::structure(format!(":61: pattern: {err}")))?;

        let mut statements = Vec::new();
        let mut open: Option<StatementBuilder> = None;

        for field in fields {
            if field.tag == "20" {
                if let Some(done) = open.take() {
                    statements.push(done.finish());
                }
                open = Some(StatementBuilder::default());
                continue;
            }

            let builder = open.as_mut().ok_or_else(|| {
                DecodeError::structure(format!("tag :{}: appears before any :20:", field.tag))
            })?;

            match field.tag.as_str() {
                "25" => builder.account = Some(field.first_line().trim().to_string()),
                "28C" | "28" => builder.number = Some(field.first_line().trim().to_string()),
                "60F" | "60M" => builder.opening = Some(parse_balance(field.first_line())?),
                "62F" | "62M" => builder.closing = Some(parse_balance(field.first_line())?),
                "61" => {
                    let entry = parse_statement_line(statement_line, &field)?;
                    builder.entries.push(entry);
                    builder.awaiting_purpose = true;
                }
                "86" => {
                    if builder.awaiting_purpose {
                        if let Some(last) = builder.entries.last_mut() {
                            last.description = field.joined(" ");
                        }
                        builder.awaiting_purpose = false;
                    }
                }
                other => {
                    debug!(tag = other, "ignoring MT940 tag");
                    builder.awaiting_purpose = false;
                }
            }
        }

        if let Some(done) = open.take() {
            statements.push(done.finish());
        }

        if statements.is_empty() {
            return Err(DecodeError::structure("no :20: statement header found"));
        }

        Ok(ParsedFile::new(FileType::Mt940, source, statements))
    }
}

#[derive(Debug)]
struct Field {
    tag: String,
    lines: Vec<String>,
}

impl Field {
    fn first_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or_default()
    }

    fn joined(&self, separator: &str) -> String {
        self.lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Splits the message body into tagged fields, joining continuation lines and dropping
/// the `{1:..}{2:..}{4:` envelope and `-}` trailer.
fn split_fields(text: &str) -> Result<Vec<Field>, DecodeError> {
    let mut fields: Vec<Field> = Vec::new();

    for raw in text.lines() {
        let mut line = raw.trim_end_matches('\r');

        if let Some(index) = line.find("{4:") {
            line = &line[index + 3..];
        } else if line.starts_with('{') {
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "-" || trimmed.starts_with("-}") {
            continue;
        }

        if let Some((tag, rest)) = split_tag(line) {
            fields.push(Field {
                tag: tag.to_string(),
                lines: vec![rest.to_string()],
            });
            continue;
        }

        match fields.last_mut() {
            Some(field) => field.lines.push(line.to_string()),
            None => {
                return Err(DecodeError::structure(format!(
                    "text outside of a tagged field: '{trimmed}'"
                )))
            }
        }
    }

    Ok(fields)
}

fn split_tag(line: &str) -> Option<(&str, &str)> {
    let body = line.strip_prefix(':')?;
    let (tag, rest) = body.split_once(':')?;
    let valid = (2..=3).contains(&tag.len())
        && tag.chars().take(2).all(|c| c.is_ascii_digit())
        && tag.chars().skip(2).all(|c| c.is_ascii_uppercase());
    valid.then_some((tag, rest))
}

#[derive(Debug, Default)]
struct StatementBuilder {
    account: Option<String>,
    number: Option<String>,
    opening: Option<Balance>,
    closing: Option<Balance>,
    entries: Vec<PendingEntry>,
    awaiting_purpose: bool,
}

impl StatementBuilder {
    fn finish(self) -> CanonicalStatement {
        let currency = self
            .opening
            .as_ref()
            .or(self.closing.as_ref())
            .map(|balance| balance.currency.clone())
            .unwrap_or_else(|| FileType::Mt940.default_currency().to_string());

        let mut statement = CanonicalStatement::new(self.account.unwrap_or_default());
        statement.statement_number = self.number.filter(|number| !number.is_empty());
        statement.opening_balance = self.opening;
        statement.closing_balance = self.closing;
        statement.transactions = self
            .entries
            .into_iter()
            .map(|entry| entry.into_transaction(&currency))
            .collect();
        statement
    }
}

#[derive(Debug)]
struct PendingEntry {
    booking_date: NaiveDate,
    value_date: NaiveDate,
    amount: Decimal,
    type_code: String,
    reference: String,
    supplementary: String,
    description: String,
}

impl PendingEntry {
    fn into_transaction(self, currency: &str) -> CanonicalTransaction {
        let description = if self.description.is_empty() {
            self.supplementary
        } else {
            self.description
        };

        CanonicalTransaction {
            date: Some(self.booking_date),
            value_date: Some(self.value_date),
            amount: self.amount,
            currency: currency.to_string(),
            reference: self.reference,
            description,
            type_code: Some(self.type_code),
        }
    }
}

fn statement_line_re() -> &'static Result<Regex, regex::Error> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STATEMENT_LINE))
}

fn parse_statement_line(pattern: &Regex, field: &Field) -> Result<PendingEntry, DecodeError> {
    let line = field.first_line().trim();
    let caps = pattern
        .captures(line)
        .ok_or_else(|| DecodeError::field(":61:", line, "does not match the statement line layout"))?;

    let value_raw = &caps["value"];
    let value_date = parse_short_date(value_raw)?;
    let booking_date = match caps.name("entry") {
        Some(entry) => entry_date(value_date, entry.as_str())?,
        None => value_date,
    };

    let magnitude = parse_amount(&caps["amount"])?;
    let amount = match &caps["mark"] {
        "C" | "RD" => magnitude,
        _ => -magnitude,
    };

    let customer = caps
        .name("customer")
        .map(|m| m.as_str().trim())
        .filter(|value| !value.is_empty() && *value != "NONREF");
    let bank = caps
        .name("bank")
        .map(|m| m.as_str().trim())
        .filter(|value| !value.is_empty());
    let reference = customer.or(bank).unwrap_or_default().to_string();

    let supplementary = field
        .lines
        .iter()
        .skip(1)
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(PendingEntry {
        booking_date,
        value_date,
        amount,
        type_code: caps["kind"].to_string(),
        reference,
        supplementary,
        description: String::new(),
    })
}

/// `D|C` + `YYMMDD` + currency + amount, e.g. `C240105CHF1000,00`.
fn parse_balance(raw: &str) -> Result<Balance, DecodeError> {
    let raw = raw.trim();
    if raw.len() < 11 || !raw.is_char_boundary(1) || !raw.is_char_boundary(7) || !raw.is_char_boundary(10) {
        return Err(DecodeError::field("balance", raw, "too short"));
    }

    let mark = &raw[..1];
    let date = parse_short_date(&raw[1..7])?;
    let currency = &raw[7..10];
    let magnitude = parse_amount(&raw[10..])?;

    let amount = match mark {
        "C" => magnitude,
        "D" => -magnitude,
        other => return Err(DecodeError::field("balance mark", other, "expected C or D")),
    };

    Ok(Balance {
        amount,
        currency: currency.to_string(),
        date: Some(date),
    })
}

fn parse_amount(raw: &str) -> Result<Decimal, DecodeError> {
    let mut normalized = raw.trim().replace(',', ".");
    if normalized.ends_with('.') {
        normalized.push('0');
    }
    Decimal::from_str(&normalized).map_err(|err| DecodeError::field("amount", raw, err))
}

fn parse_short_date(raw: &str) -> Result<NaiveDate, DecodeError> {
    NaiveDate::parse_from_str(raw, "%y%m%d").map_err(|err| DecodeError::field("date", raw, err))
}

/// Entry dates carry only month and day; borrow the value date's year, correcting for
/// statements that straddle new year.
fn entry_date(value_date: NaiveDate, mmdd: &str) -> Result<NaiveDate, DecodeError> {
    let month: u32 = mmdd[..2]
        .parse()
        .map_err(|err| DecodeError::field("entry date", mmdd, err))?;
    let year = match (value_date.month(), month) {
        (12, 1) => value_date.year() + 1,
        (1, 12) => value_date.year() - 1,
        _ => value_date.year(),
    };

    NaiveDate::parse_from_str(&format!("{year}{mmdd}"), "%Y%m%d")
        .map_err(|err| DecodeError::field("entry date", mmdd, err))
}
