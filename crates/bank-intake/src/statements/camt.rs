//! ISO 20022 camt.053 bank-to-customer statements (camt.052 reports are accepted too).

use super::decoder::{utf8_text, DecodeError, StatementDecoder};
use super::model::{Balance, CanonicalStatement, CanonicalTransaction, FileType, ParsedFile};
use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rust_decimal::Decimal;
use std::str::FromStr;

const EXTENSIONS: &[&str] = &[".xml"];
const CAMT_NAMESPACE: &str = "urn:iso:std:iso:20022:tech:xsd:camt.053";
const REPORT_ELEMENTS: &[&str] = &["BkToCstmrStmt", "BkToCstmrAcctRpt"];

#[derive(Debug, Default, Clone, Copy)]
pub struct Camt053Decoder;

impl StatementDecoder for Camt053Decoder {
    fn file_type(&self) -> FileType {
        FileType::Camt053
    }

    fn extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn description(&self) -> &'static str {
        "ISO 20022 camt.053 cash management statement"
    }

    fn decode(&self, source: &str, bytes: &[u8]) -> Result<ParsedFile, DecodeError> {
        let text = utf8_text(bytes)?;
        if !text.trim_start().starts_with('<') {
            return Err(not_camt("content is not an XML document"));
        }

        let document = parse_document(text)?;
        let declared = document
            .namespaces
            .iter()
            .any(|uri| uri.starts_with(CAMT_NAMESPACE));
        let has_report = REPORT_ELEMENTS
            .iter()
            .any(|name| !document.root.descendants(name).is_empty());
        if !declared && !has_report {
            return Err(not_camt("no camt.053 namespace or bank-to-customer report element"));
        }

        let mut statements = Vec::new();
        for node in document
            .root
            .descendants("Stmt")
            .into_iter()
            .chain(document.root.descendants("Rpt"))
        {
            statements.push(statement_from(node)?);
        }

        Ok(ParsedFile::new(FileType::Camt053, source, statements))
    }
}

fn not_camt(reason: &str) -> DecodeError {
    DecodeError::NotThisFormat {
        file_type: FileType::Camt053,
        reason: reason.to_string(),
    }
}

fn statement_from(node: &Element) -> Result<CanonicalStatement, DecodeError> {
    let account = node
        .find(&["IBAN"])
        .or_else(|| node.find(&["Othr", "Id"]))
        .map(Element::text)
        .unwrap_or_default();
    let account_currency = node
        .find(&["Acct", "Ccy"])
        .map(|el| el.text().to_string())
        .unwrap_or_else(|| FileType::Camt053.default_currency().to_string());

    let mut statement = CanonicalStatement::new(account);
    statement.statement_number = node
        .child("Id")
        .or_else(|| node.child("ElctrncSeqNb"))
        .map(|el| el.text().to_string())
        .filter(|value| !value.is_empty());

    for balance in node.children_named("Bal") {
        let code = balance
            .find(&["Tp", "CdOrPrtry", "Cd"])
            .map(Element::text)
            .unwrap_or_default();
        match code {
            "OPBD" | "PRCD" if statement.opening_balance.is_none() => {
                statement.opening_balance = Some(parse_balance(balance, &account_currency)?);
            }
            "CLBD" if statement.closing_balance.is_none() => {
                statement.closing_balance = Some(parse_balance(balance, &account_currency)?);
            }
            _ => {}
        }
    }
    if statement.opening_balance.is_none() {
        if let Some(legacy) = node.child("OpenBal") {
            statement.opening_balance = Some(parse_balance(legacy, &account_currency)?);
        }
    }
    if statement.closing_balance.is_none() {
        if let Some(legacy) = node.child("ClsgBal") {
            statement.closing_balance = Some(parse_balance(legacy, &account_currency)?);
        }
    }

    for entry in node.descendants("Ntry") {
        statement
            .transactions
            .push(transaction_from(entry, &account_currency)?);
    }

    Ok(statement)
}

fn transaction_from(
    entry: &Element,
    account_currency: &str,
) -> Result<CanonicalTransaction, DecodeError> {
    let amount_node = entry.child("Amt").or_else(|| entry.find(&["Amt"]));
    let magnitude = match amount_node {
        Some(node) => parse_amount(node.text())?,
        None => Decimal::ZERO,
    };
    let currency = amount_node
        .and_then(|node| node.attribute("Ccy"))
        .unwrap_or(account_currency)
        .to_string();

    let amount = signed(magnitude, entry.child("CdtDbtInd").map(Element::text));

    let reference = ["AcctSvcrRef", "NtryRef", "EndToEndId"]
        .iter()
        .find_map(|name| entry.find(&[*name]))
        .map(|el| el.text().to_string())
        .unwrap_or_default();

    let remittance: Vec<&str> = entry
        .descendants("RmtInf")
        .into_iter()
        .flat_map(|info| info.children_named("Ustrd"))
        .map(Element::text)
        .filter(|text| !text.is_empty())
        .collect();
    let description = if remittance.is_empty() {
        ["AddtlNtryInf", "AddtlTxInf"]
            .iter()
            .find_map(|name| entry.find(&[*name]))
            .map(|el| el.text().to_string())
            .unwrap_or_default()
    } else {
        remittance.join(" ")
    };

    let type_code = entry
        .find(&["BkTxCd", "Prtry", "Cd"])
        .or_else(|| entry.find(&["BkTxCd", "Domn", "Cd"]))
        .map(|el| el.text().to_string());

    Ok(CanonicalTransaction {
        date: date_of(entry.child("BookgDt"))?,
        value_date: date_of(entry.child("ValDt"))?,
        amount,
        currency,
        reference,
        description,
        type_code,
    })
}

fn parse_balance(node: &Element, account_currency: &str) -> Result<Balance, DecodeError> {
    let amount_node = node.child("Amt");
    let magnitude = match amount_node {
        Some(amount) => parse_amount(amount.text())?,
        None => Decimal::ZERO,
    };
    let currency = amount_node
        .and_then(|amount| amount.attribute("Ccy"))
        .unwrap_or(account_currency)
        .to_string();

    Ok(Balance {
        amount: signed(magnitude, node.child("CdtDbtInd").map(Element::text)),
        currency,
        date: date_of(node.child("Dt"))?,
    })
}

fn signed(magnitude: Decimal, indicator: Option<&str>) -> Decimal {
    match indicator {
        Some("DBIT") => -magnitude,
        _ => magnitude,
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(trimmed).map_err(|err| DecodeError::field("amount", trimmed, err))
}

/// Reads `<Dt>` or `<DtTm>` beneath a date wrapper such as `BookgDt`.
fn date_of(wrapper: Option<&Element>) -> Result<Option<NaiveDate>, DecodeError> {
    let Some(wrapper) = wrapper else {
        return Ok(None);
    };
    let raw = wrapper
        .child("Dt")
        .or_else(|| wrapper.child("DtTm"))
        .map(Element::text)
        .unwrap_or_else(|| wrapper.text());
    if raw.is_empty() {
        return Ok(None);
    }

    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map(Some)
        .map_err(|err| DecodeError::field("date", raw, err))
}

/// Namespace-stripped element tree.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn text(&self) -> &str {
        self.text.trim()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Every descendant with the given name, in document order.
    fn descendants(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        let mut pending: Vec<&Element> = self.children.iter().rev().collect();
        while let Some(next) = pending.pop() {
            pending.extend(next.children.iter().rev());
            if next.name == name {
                found.push(next);
            }
        }
        found
    }

    /// First descendant named `path[0]` whose direct children continue the rest of `path`.
    fn find(&self, path: &[&str]) -> Option<&Element> {
        let (head, rest) = path.split_first()?;
        self.descendants(head).into_iter().find_map(|candidate| {
            rest.iter()
                .try_fold(candidate, |node, segment| node.child(segment))
        })
    }
}

struct Document {
    root: Element,
    namespaces: Vec<String>,
}

fn parse_document(text: &str) -> Result<Document, DecodeError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut namespaces = Vec::new();

    loop {
        let event = reader.read_event().map_err(|err| {
            DecodeError::structure(format!(
                "XML error at byte {}: {err}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Start(start) => stack.push(open_element(&start, &mut namespaces)?),
            Event::Empty(start) => {
                let element = open_element(&start, &mut namespaces)?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DecodeError::structure("unbalanced closing tag"))?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::Text(content) => {
                let value = content
                    .unescape()
                    .map_err(|err| DecodeError::structure(format!("XML text: {err}")))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&value);
                }
            }
            Event::CData(content) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&content.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(DecodeError::structure("document ends inside an open element"));
    }

    let root = root.ok_or_else(|| DecodeError::structure("document has no root element"))?;
    Ok(Document { root, namespaces })
}

fn open_element(start: &BytesStart<'_>, namespaces: &mut Vec<String>) -> Result<Element, DecodeError> {
    let mut element = Element {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        ..Element::default()
    };

    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|err| DecodeError::structure(format!("XML attribute: {err}")))?;
        let value = attribute
            .unescape_value()
            .map_err(|err| DecodeError::structure(format!("XML attribute: {err}")))?
            .into_owned();
        let key = attribute.key.as_ref();

        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            namespaces.push(value);
        } else {
            let name = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            element.attributes.push((name, value));
        }
    }

    Ok(element)
}

fn attach(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), DecodeError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(DecodeError::structure("multiple root elements")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn document(entries: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02">
  <BkToCstmrStmt>
    <Stmt>
      <Id>STMT-2024-01</Id>
      <ElctrncSeqNb>7</ElctrncSeqNb>
      <Acct><Id><IBAN>CH9300762011623852957</IBAN></Id><Ccy>CHF</Ccy></Acct>
      <Bal>
        <Tp><CdOrPrtry><Cd>OPBD</Cd></CdOrPrtry></Tp>
        <Amt Ccy="CHF">500.00</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <Dt><Dt>2024-01-04</Dt></Dt>
      </Bal>
      <Bal>
        <Tp><CdOrPrtry><Cd>CLBD</Cd></CdOrPrtry></Tp>
        <Amt Ccy="CHF">550.00</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <Dt><Dt>2024-01-05</Dt></Dt>
      </Bal>
      {entries}
    </Stmt>
  </BkToCstmrStmt>
</Document>"#
        )
    }

    const DEBIT_ENTRY: &str = r#"<Ntry>
        <Amt Ccy="CHF">50.00</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <BookgDt><Dt>2024-01-05</Dt></BookgDt>
        <ValDt><DtTm>2024-01-06T09:30:00</DtTm></ValDt>
        <AcctSvcrRef>REF-1</AcctSvcrRef>
        <BkTxCd><Prtry><Cd>PMNT</Cd></Prtry></BkTxCd>
        <NtryDtls><TxDtls><RmtInf><Ustrd>Rent</Ustrd><Ustrd>January</Ustrd></RmtInf></TxDtls></NtryDtls>
      </Ntry>"#;

    #[test]
    fn debit_indicator_negates_amount() {
        let xml = document(DEBIT_ENTRY);
        let parsed = Camt053Decoder
            .decode("camt053.xml", xml.as_bytes())
            .expect("decodes");

        let statement = &parsed.statements()[0];
        assert_eq!(statement.account_id, "CH9300762011623852957");
        assert_eq!(statement.statement_number.as_deref(), Some("STMT-2024-01"));
        assert_eq!(
            statement.opening_balance.as_ref().map(|b| b.amount),
            Some(dec!(-500.00))
        );
        assert_eq!(
            statement.closing_balance.as_ref().and_then(|b| b.date),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );

        let tx = &statement.transactions[0];
        assert_eq!(tx.amount, dec!(-50.00));
        assert_eq!(tx.currency, "CHF");
        assert_eq!(tx.reference, "REF-1");
        assert_eq!(tx.description, "Rent January");
        assert_eq!(tx.type_code.as_deref(), Some("PMNT"));
        assert_eq!(tx.value_date, NaiveDate::from_ymd_opt(2024, 1, 6));
        assert!(Camt053Decoder.validate(&parsed));
    }

    #[test]
    fn credit_indicator_keeps_amount_positive() {
        let entry = DEBIT_ENTRY.replace("DBIT", "CRDT");
        let parsed = Camt053Decoder
            .decode("camt053.xml", document(&entry).as_bytes())
            .expect("decodes");
        assert_eq!(parsed.total_amount(), dec!(50.00));
    }

    #[test]
    fn report_element_is_enough_without_namespace() {
        let xml = "<Document><BkToCstmrAcctRpt><Rpt><Acct><Id><Othr><Id>4711</Id></Othr></Id></Acct>\
<Ntry><Amt Ccy=\"EUR\">1.25</Amt><CdtDbtInd>CRDT</CdtDbtInd></Ntry></Rpt></BkToCstmrAcctRpt></Document>";
        let parsed = Camt053Decoder.decode("rpt.xml", xml.as_bytes()).expect("decodes");
        assert_eq!(parsed.statements()[0].account_id, "4711");
        assert_eq!(parsed.total_transactions(), 1);
    }

    #[test]
    fn other_xml_is_not_this_format() {
        let xml = r#"<Document xmlns="urn:iso:std:iso:20022:tech:xsd:pain.001.001.03"><CstmrCdtTrfInitn/></Document>"#;
        let err = Camt053Decoder.decode("pain.xml", xml.as_bytes()).expect_err("rejects");
        assert!(err.is_wrong_format());
    }

    #[test]
    fn non_xml_content_is_not_this_format() {
        let err = Camt053Decoder
            .decode("export.xml", b"date,amount\n2024-01-05,1.00\n")
            .expect_err("rejects");
        assert!(err.is_wrong_format());
    }

    #[test]
    fn unbalanced_document_is_structure_error() {
        let err = Camt053Decoder
            .decode("broken.xml", b"<Document><BkToCstmrStmt></Document>")
            .expect_err("rejects");
        assert!(matches!(err, DecodeError::Structure(_)));
    }

    #[test]
    fn unparseable_amount_is_field_error() {
        let entry = DEBIT_ENTRY.replace("50.00", "fifty");
        let err = Camt053Decoder
            .decode("camt053.xml", document(&entry).as_bytes())
            .expect_err("rejects");
        assert!(matches!(err, DecodeError::Field { field: "amount", .. }));
    }
}
