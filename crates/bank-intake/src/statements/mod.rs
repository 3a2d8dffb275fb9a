//! Canonical statement model and the format decoders that produce it.

mod bai;
mod camt;
mod decoder;
mod delimited;
mod model;
mod registry;
mod swift;

pub use bai::Bai2Decoder;
pub use camt::Camt053Decoder;
pub use decoder::{DecodeError, StatementDecoder};
pub use delimited::DelimitedDecoder;
pub use model::{
    total_amount, Balance, CanonicalStatement, CanonicalTransaction, FileType, ParsedFile,
    ProcessingSummary, UNKNOWN_ACCOUNT,
};
pub use registry::{DecoderRegistry, FormatDescriptor};
pub use swift::Mt940Decoder;
