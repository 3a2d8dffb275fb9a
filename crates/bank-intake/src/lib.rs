//! Bank statement intake: decodes MT940, camt.053, BAI2, and delimited-text statements into
//! one canonical model, routes each file through an audited processing job, and drives the
//! poll-fetch-process-archive loop over a remote file drop.

pub mod config;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod routing;
pub mod statements;
pub mod telemetry;
