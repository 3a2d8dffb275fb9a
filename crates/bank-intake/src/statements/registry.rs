use super::bai::Bai2Decoder;
use super::camt::Camt053Decoder;
use super::decoder::{DecodeError, StatementDecoder};
use super::delimited::DelimitedDecoder;
use super::model::{FileType, ParsedFile};
use super::swift::Mt940Decoder;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// One row of the supported-formats listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    pub file_type: FileType,
    pub extensions: Vec<&'static str>,
    pub description: &'static str,
}

/// Decoders in fixed priority order; the last one is the fallback.
#[derive(Debug, Clone)]
pub struct DecoderRegistry {
    decoders: Vec<Arc<dyn StatementDecoder>>,
}

impl DecoderRegistry {
    pub fn standard() -> Self {
        Self {
            decoders: vec![
                Arc::new(Mt940Decoder),
                Arc::new(Camt053Decoder),
                Arc::new(Bai2Decoder),
                Arc::new(DelimitedDecoder),
            ],
        }
    }

    fn fallback(&self) -> &Arc<dyn StatementDecoder> {
        // `standard()` always ends with the delimited decoder.
        &self.decoders[self.decoders.len() - 1]
    }

    /// First decoder claiming `filename`, or the fallback.
    pub fn select_for(&self, filename: &str) -> Arc<dyn StatementDecoder> {
        self.claim(filename)
            .unwrap_or_else(|| Arc::clone(self.fallback()))
    }

    /// First decoder claiming `filename`; `None` is a classification miss.
    pub fn claim(&self, filename: &str) -> Option<Arc<dyn StatementDecoder>> {
        self.decoders
            .iter()
            .find(|decoder| decoder.can_handle(filename))
            .cloned()
    }

    pub fn decoder_for(&self, file_type: FileType) -> Option<Arc<dyn StatementDecoder>> {
        self.decoders
            .iter()
            .find(|decoder| decoder.file_type() == file_type)
            .cloned()
    }

    /// Decodes with the selected decoder. A `NotThisFormat` answer hands the file to the
    /// next decoder (in priority order) that also claims it, finishing with the fallback.
    pub fn decode(&self, filename: &str, bytes: &[u8]) -> Result<ParsedFile, DecodeError> {
        let start = self
            .decoders
            .iter()
            .position(|decoder| decoder.can_handle(filename))
            .unwrap_or(self.decoders.len() - 1);
        let last = self.decoders.len() - 1;

        let mut candidates = vec![start];
        candidates.extend(
            (start + 1..last).filter(|index| self.decoders[*index].can_handle(filename)),
        );
        if start != last {
            candidates.push(last);
        }

        let mut last_error = None;
        for index in candidates {
            let decoder = &self.decoders[index];
            debug!(filename, file_type = %decoder.file_type(), "attempting decode");
            match decoder.decode(filename, bytes) {
                Ok(parsed) => {
                    info!(
                        filename,
                        file_type = %parsed.file_type(),
                        statements = parsed.statements().len(),
                        transactions = parsed.total_transactions(),
                        "decoded statement file"
                    );
                    return Ok(parsed);
                }
                Err(err) if err.is_wrong_format() => {
                    debug!(filename, error = %err, "decoder declined, trying next");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| DecodeError::structure("no decoder accepted the file")))
    }

    pub fn supported_formats(&self) -> Vec<FormatDescriptor> {
        self.decoders
            .iter()
            .map(|decoder| FormatDescriptor {
                file_type: decoder.file_type(),
                extensions: decoder.extensions().to_vec(),
                description: decoder.description(),
            })
            .collect()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case("statement.mt940", Some(FileType::Mt940))]
    #[case("STATEMENT.940", Some(FileType::Mt940))]
    #[case("camt.xml", Some(FileType::Camt053))]
    #[case("daily_bai.txt", Some(FileType::Bai2))]
    #[case("export.csv", Some(FileType::Csv))]
    #[case("readme.pdf", None)]
    #[case("notes.txt", None)]
    fn claims_by_filename(#[case] filename: &str, #[case] expected: Option<FileType>) {
        let registry = DecoderRegistry::standard();
        assert_eq!(registry.claim(filename).map(|d| d.file_type()), expected);
    }

    #[test]
    fn select_falls_back_to_delimited() {
        let registry = DecoderRegistry::standard();
        assert_eq!(registry.select_for("mystery.dat").file_type(), FileType::Csv);
    }

    #[test]
    fn wrong_format_xml_falls_back_to_delimited() {
        let registry = DecoderRegistry::standard();
        let parsed = registry
            .decode("export.xml", b"date,amount\n2024-01-05,7.25\n")
            .expect("fallback decodes");
        assert_eq!(parsed.file_type(), FileType::Csv);
        assert_eq!(parsed.total_amount(), dec!(7.25));
    }

    #[test]
    fn structural_errors_are_final() {
        let registry = DecoderRegistry::standard();
        let err = registry
            .decode("broken.mt940", b"no tags here\n")
            .expect_err("rejects");
        assert!(matches!(err, DecodeError::Structure(_)));
    }

    #[test]
    fn lists_formats_in_priority_order() {
        let formats = DecoderRegistry::standard().supported_formats();
        let types: Vec<FileType> = formats.iter().map(|f| f.file_type).collect();
        assert_eq!(types, FileType::ordered().to_vec());
        assert!(formats[0].extensions.contains(&".mt940"));
    }
}
