use bank_intake::statements::{
    total_amount, DecodeError, DecoderRegistry, FileType, ParsedFile, UNKNOWN_ACCOUNT,
};
use rstest::rstest;
use rust_decimal_macros::dec;

const MT940: &str = "{1:F01BANKCHZZAXXX0000000000}{4:\n\
:20:STMT-0001\n\
:25:CH9300762011623852957\n\
:28C:00001/001\n\
:60F:C240104CHF1000,00\n\
:61:2401050105C250,00NTRFINV-778//B24010501\n\
:86:Invoice 778\n\
:61:2401050105D75,5NMSCNONREF//B24010502\n\
:86:Card fees\n\
:62F:C240105CHF1174,50\n\
-}\n";

const CAMT053: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02">
  <BkToCstmrStmt>
    <Stmt>
      <Id>STMT-2024-01</Id>
      <Acct><Id><IBAN>CH9300762011623852957</IBAN></Id><Ccy>CHF</Ccy></Acct>
      <Ntry>
        <Amt Ccy="CHF">50.00</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <BookgDt><Dt>2024-01-05</Dt></BookgDt>
        <AcctSvcrRef>REF-1</AcctSvcrRef>
      </Ntry>
      <Ntry>
        <Amt Ccy="CHF">20.25</Amt>
        <CdtDbtInd>CRDT</CdtDbtInd>
        <BookgDt><Dt>2024-01-05</Dt></BookgDt>
      </Ntry>
    </Stmt>
  </BkToCstmrStmt>
</Document>"#;

const BAI2: &str = "01,BANKUS33,ACME,240105,0800,1,,,2/\n\
02,ACME,BANKUS33,1,240105,0800,USD,2/\n\
03,111222333,USD,010,500000,,/\n\
16,165,150000,Z,BR-1,CR-1,Customer deposit/\n\
16,475,2500,Z,BR-2,,Check 1001/\n\
49,147500,4/\n\
03,444555666,EUR,010,100,,/\n\
16,195,12.34,Z,,CR-9,Wire in/\n\
49,1234,2/\n\
99,148734,1,11/\n";

fn assert_consistent(parsed: &ParsedFile) {
    let count: usize = parsed
        .statements()
        .iter()
        .map(|statement| statement.transactions.len())
        .sum();
    assert_eq!(parsed.total_transactions(), count);
    assert_eq!(parsed.total_amount(), total_amount(parsed.statements()));
    assert!(parsed.is_consistent());
}

#[test]
fn delimited_export_with_german_headers() {
    let registry = DecoderRegistry::standard();
    let parsed = registry
        .decode("kontoauszug.csv", b"Datum,Betrag,Waehrung\n2024-01-05,100.50,CHF\n")
        .expect("decodes");

    assert_eq!(parsed.file_type(), FileType::Csv);
    assert_eq!(parsed.statements().len(), 1);
    let statement = &parsed.statements()[0];
    assert_eq!(statement.account_id, UNKNOWN_ACCOUNT);
    assert_eq!(statement.transactions.len(), 1);
    assert_eq!(statement.transactions[0].amount, dec!(100.50));
    assert_eq!(statement.transactions[0].currency, "CHF");
    assert_consistent(&parsed);
}

#[test]
fn camt_debit_entry_is_negative() {
    let registry = DecoderRegistry::standard();
    let parsed = registry
        .decode("camt053_20240105.xml", CAMT053.as_bytes())
        .expect("decodes");

    assert_eq!(parsed.file_type(), FileType::Camt053);
    let transactions = &parsed.statements()[0].transactions;
    assert_eq!(transactions[0].amount, dec!(-50.00));
    assert_eq!(transactions[1].amount, dec!(20.25));
    assert_eq!(parsed.total_amount(), dec!(-29.75));
    assert_consistent(&parsed);
}

#[rstest]
#[case("statement.940", MT940, FileType::Mt940, 1, 2)]
#[case("camt053.xml", CAMT053, FileType::Camt053, 1, 2)]
#[case("ledger.bai2", BAI2, FileType::Bai2, 2, 3)]
fn every_format_reports_consistent_aggregates(
    #[case] filename: &str,
    #[case] content: &str,
    #[case] file_type: FileType,
    #[case] statements: usize,
    #[case] transactions: usize,
) {
    let registry = DecoderRegistry::standard();
    let parsed = registry.decode(filename, content.as_bytes()).expect("decodes");

    assert_eq!(parsed.file_type(), file_type);
    assert_eq!(parsed.statements().len(), statements);
    assert_eq!(parsed.total_transactions(), transactions);
    assert_consistent(&parsed);

    let decoder = registry.decoder_for(file_type).expect("registered");
    assert!(decoder.validate(&parsed));
}

#[test]
fn bai2_statements_flush_per_account() {
    let registry = DecoderRegistry::standard();
    let parsed = registry.decode("ledger.bai2", BAI2.as_bytes()).expect("decodes");

    let accounts: Vec<&str> = parsed
        .statements()
        .iter()
        .map(|statement| statement.account_id.as_str())
        .collect();
    assert_eq!(accounts, ["111222333", "444555666"]);
    assert_eq!(parsed.statements()[0].net_amount(), dec!(1475.00));
    assert_eq!(parsed.statements()[1].net_amount(), dec!(12.34));
}

#[rstest]
#[case("DATE;AMOUNT;CURRENCY\n")]
#[case("Buchungstag;Betrag;Währung\n")]
#[case("Booking_Date;Value;CCY\n")]
fn delimited_headers_match_case_insensitively(#[case] header: &str) {
    let content = format!("{header}2024-01-05;-12,50;EUR\n");
    let registry = DecoderRegistry::standard();
    let parsed = registry.decode("export.csv", content.as_bytes()).expect("decodes");

    let transaction = &parsed.statements()[0].transactions[0];
    assert_eq!(transaction.amount, dec!(-12.50));
    assert_eq!(transaction.currency, "EUR");
}

#[test]
fn unparseable_delimited_amount_counts_as_zero() {
    let registry = DecoderRegistry::standard();
    let parsed = registry
        .decode("export.csv", b"date,amount\n2024-01-05,n/a\n2024-01-06,3.00\n")
        .expect("decodes");

    assert_eq!(parsed.total_transactions(), 2);
    assert_eq!(parsed.statements()[0].transactions[0].amount, dec!(0));
    assert_eq!(parsed.total_amount(), dec!(3.00));
}

#[test]
fn xml_named_file_that_is_not_markup_falls_back_to_delimited() {
    let registry = DecoderRegistry::standard();
    let parsed = registry
        .decode("export.xml", b"date,amount\n2024-01-05,7.00\n")
        .expect("falls back");
    assert_eq!(parsed.file_type(), FileType::Csv);
    assert_eq!(parsed.total_amount(), dec!(7.00));
}

#[test]
fn malformed_field_is_final() {
    let registry = DecoderRegistry::standard();
    let err = registry
        .decode("broken.bai", b"03,ACC-1,USD/\n16,165,12x4,Z,R1/\n")
        .expect_err("bad amount");
    assert!(matches!(err, DecodeError::Field { field: "amount", .. }));
}
