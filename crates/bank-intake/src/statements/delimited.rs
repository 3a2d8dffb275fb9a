//! Delimited text exports (CSV and friends). This decoder is the registry fallback, so it
//! accepts anything that yields a header row with at least one recognised column.

use super::decoder::{utf8_text, DecodeError, StatementDecoder};
use super::model::{CanonicalStatement, CanonicalTransaction, FileType, ParsedFile};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, warn};

const EXTENSIONS: &[&str] = &[".csv"];
const SNIFF_BYTES: usize = 1024;
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%m/%d/%Y", "%Y%m%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Date,
    Amount,
    Currency,
    Description,
    Reference,
    Account,
}

const HEADER_SYNONYMS: [(Column, &[&str]); 6] = [
    (
        Column::Date,
        &["date", "booking_date", "transaction_date", "datum", "buchungstag"],
    ),
    (Column::Amount, &["amount", "betrag", "sum", "value", "umsatz"]),
    (
        Column::Currency,
        &["currency", "waehrung", "währung", "curr", "ccy"],
    ),
    (
        Column::Description,
        &["description", "purpose", "verwendungszweck", "text", "memo"],
    ),
    (Column::Reference, &["reference", "ref", "referenz"]),
    (Column::Account, &["account", "konto", "account_number", "iban"]),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct DelimitedDecoder;

impl StatementDecoder for DelimitedDecoder {
    fn file_type(&self) -> FileType {
        FileType::Csv
    }

    fn extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn description(&self) -> &'static str {
        "Delimited text export with a header row"
    }

    fn decode(&self, source: &str, bytes: &[u8]) -> Result<ParsedFile, DecodeError> {
        let text = utf8_text(bytes)?;
        let delimiter = sniff_delimiter(text.as_bytes());
        debug!(source, delimiter = %char::from(delimiter), "sniffed delimiter");

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|err| DecodeError::structure(format!("unreadable header row: {err}")))?
            .clone();
        let columns = HeaderMap::resolve(&headers);
        if columns.is_empty() {
            return Err(DecodeError::structure(format!(
                "no recognised column in header '{}'",
                headers.iter().collect::<Vec<_>>().join(",")
            )));
        }

        let mut statement: Option<CanonicalStatement> = None;
        for (index, record) in reader.records().enumerate() {
            let record = record
                .map_err(|err| DecodeError::structure(format!("row {}: {err}", index + 2)))?;

            let statement = statement.get_or_insert_with(|| {
                CanonicalStatement::new(columns.get(&record, Column::Account).unwrap_or_default())
            });

            let raw_amount = columns.get(&record, Column::Amount).unwrap_or_default();
            let amount = parse_amount(raw_amount).unwrap_or_else(|| {
                if !raw_amount.is_empty() {
                    warn!(source, row = index + 2, value = raw_amount, "amount unreadable, using zero");
                }
                Decimal::ZERO
            });
            let currency = columns
                .get(&record, Column::Currency)
                .filter(|value| !value.is_empty())
                .unwrap_or(FileType::Csv.default_currency());

            statement.transactions.push(CanonicalTransaction {
                date: columns.get(&record, Column::Date).and_then(parse_date),
                value_date: None,
                amount,
                currency: currency.to_string(),
                reference: columns
                    .get(&record, Column::Reference)
                    .unwrap_or_default()
                    .to_string(),
                description: columns
                    .get(&record, Column::Description)
                    .unwrap_or_default()
                    .to_string(),
                type_code: None,
            });
        }

        Ok(ParsedFile::new(
            FileType::Csv,
            source,
            statement.into_iter().collect(),
        ))
    }
}

/// Header position per semantic column.
#[derive(Debug, Default)]
struct HeaderMap {
    positions: Vec<(Column, usize)>,
}

impl HeaderMap {
    fn resolve(headers: &csv::StringRecord) -> Self {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let positions = HEADER_SYNONYMS
            .iter()
            .filter_map(|(column, synonyms)| {
                synonyms
                    .iter()
                    .find_map(|synonym| lowered.iter().position(|header| header == synonym))
                    .map(|index| (*column, index))
            })
            .collect();
        Self { positions }
    }

    fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: Column) -> Option<&'r str> {
        self.positions
            .iter()
            .find(|(candidate, _)| *candidate == column)
            .and_then(|(_, index)| record.get(*index))
    }
}

/// Picks the candidate that appears the same non-zero number of times on every sampled
/// line, preferring the highest count. Falls back to a comma.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let sample = &bytes[..bytes.len().min(SNIFF_BYTES)];
    let mut lines: Vec<&[u8]> = sample
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .collect();
    // The last line may be cut off by the sample window.
    if bytes.len() > SNIFF_BYTES && lines.len() > 1 {
        lines.pop();
    }

    CANDIDATE_DELIMITERS
        .iter()
        .filter_map(|candidate| {
            let mut counts = lines
                .iter()
                .map(|line| line.iter().filter(|byte| *byte == candidate).count());
            let first = counts.next()?;
            (first > 0 && counts.all(|count| count == first)).then_some((*candidate, first))
        })
        .max_by_key(|(_, count)| *count)
        .map(|(candidate, _)| candidate)
        .unwrap_or(b',')
}

fn parse_amount(raw: &str) -> Option<Decimal> {
    let mut cleaned: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '€' && *ch != '$')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let commas = cleaned.matches(',').count();
    match (cleaned.rfind(','), cleaned.rfind('.')) {
        // `1.000,50`: the comma is the decimal mark.
        (Some(comma), Some(dot)) if comma > dot => {
            cleaned.retain(|ch| ch != '.');
            cleaned = cleaned.replace(',', ".");
        }
        (Some(_), Some(_)) => cleaned.retain(|ch| ch != ','),
        (Some(_), None) if commas == 1 => cleaned = cleaned.replace(',', "."),
        (Some(_), None) => cleaned.retain(|ch| ch != ','),
        (None, _) => {}
    }

    Decimal::from_str(&cleaned).ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}
