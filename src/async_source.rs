#![cfg(feature = "async")]
//! Async frame source: a Tokio `Stream` front end over the synchronous
//! [`crate::Session`] + [`crate::source`] pipeline.
//!
//! MP4 extraction needs `Seek`, so the actual work still runs synchronously,
//! just moved onto a blocking task and forwarded to the caller over a
//! channel.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::Error;
use crate::report::AuthenticityReport;
use crate::session::{Session, SessionConfig};
use crate::source::nalu_source_from_path;
use crate::verifier::Verifier;

/// Create a Tokio `Stream` of [`AuthenticityReport`]s, one per settled GOP,
/// by driving a `Session` over every NAL unit found in a file on disk.
///
/// This API is enabled by default (crate feature `async`).
///
/// `config.codec` is only used for raw Annex-B input; an MP4 container's
/// own `avcC`/`hvcC` box decides the codec instead.
pub fn authenticate_stream_from_path(
    path: impl Into<PathBuf>,
    config: SessionConfig,
    verifier: Box<dyn Verifier>,
    buffer: usize,
) -> ReceiverStream<Result<AuthenticityReport, Error>> {
    let path = path.into();
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::task::spawn_blocking(move || {
        let source = match nalu_source_from_path(&path, config.codec) {
            Ok(s) => s,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };

        let mut session = Session::with_config(config);
        session.set_verifier(verifier);

        for nalu in source {
            match session.add_nalu_and_authenticate(&nalu) {
                Ok(Some(report)) => {
                    if tx.blocking_send(Ok(report)).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
    });

    ReceiverStream::new(rx)
}
