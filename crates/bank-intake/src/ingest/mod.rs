//! The poll-fetch-process-archive loop over a remote file drop.

mod archive;
mod downstream;
mod monitor;
mod pipeline;
mod remote;
mod sftp;

pub use archive::{Archive, ArchiveError};
pub use downstream::{
    DownstreamError, DownstreamGateway, DownstreamReply, DownstreamRequest, LoggingDownstream,
};
pub use monitor::{IngestErrorRecord, IngestMonitor, IngestStats};
pub use pipeline::{
    CycleError, CycleReport, FileDisposition, FileOutcome, IngestParts, IngestionLoop,
    INGEST_ACTOR,
};
pub use remote::{DirectoryDrop, DropSession, RemoteDrop, RemoteEntry, TransportError};
pub use sftp::SftpDrop;

use crate::config::IngestConfig;
use std::sync::Arc;

/// The SFTP drop when one is configured, otherwise the mounted directory.
pub fn configured_drop(config: &IngestConfig) -> Arc<dyn RemoteDrop> {
    match &config.sftp {
        Some(settings) => Arc::new(SftpDrop::new(settings.clone())),
        None => Arc::new(DirectoryDrop::new(&config.drop_dir)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SftpSettings;

    #[test]
    fn sftp_settings_take_precedence_over_the_directory() {
        let mut config = IngestConfig::default();
        assert_eq!(configured_drop(&config).location(), "/srv/bank-intake/incoming");

        config.sftp = Some(SftpSettings {
            host: "sftp.bank.example".to_string(),
            port: 22,
            username: "bank".to_string(),
            password: "password".to_string(),
            remote_dir: "/incoming".to_string(),
        });
        assert_eq!(
            configured_drop(&config).location(),
            "sftp://bank@sftp.bank.example:22/incoming"
        );
    }
}
