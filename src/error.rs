use std::io;

use thiserror::Error;

/// Session-wide and I/O error kinds.
///
/// The six variants at the top cover session-wide failures: parsing
/// failures confined to a single NAL unit never produce an `Error` here;
/// they degrade the affected item's `ValidationStatus` to `Error` and
/// processing continues (see [`crate::nalu`]). Cryptographic verification
/// failure is similarly not an `Error` — it is a verdict. These variants are
/// only for conditions that make the session itself unusable until
/// [`crate::Session::reset`].
///
/// The `Mp4*`/`Io`/`NoTracksFound`/`SampleIndexOutOfRange` variants below
/// belong to the ambient MP4-demux CLI input path (`crate::mp4`), which has
/// no counterpart in the authenticated core.
#[derive(Debug, Error)]
pub enum Error {
    /// Null/zero-sized/mutually-exclusive arguments to a session call.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Setting a field that cannot change mid-session, or operating on a
    /// session with no verifier configured.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Allocation failure, or a caller-supplied NALU exceeding the
    /// configured `max_nalu_len` policy cap.
    #[error("memory: {0}")]
    Memory(String),

    /// TLV or SEI version newer than this crate understands.
    #[error("incompatible version: {0}")]
    IncompatibleVersion(String),

    /// TLV length overrun, trailing bytes, or otherwise malformed wire data
    /// at the session-wide level (as opposed to a single discardable item).
    #[error("decoding error: {0}")]
    DecodingError(String),

    /// Internal assertion failure.
    #[error("internal error: {0}")]
    Unknown(String),

    /// Passthrough for IO errors (open/read/seek) from the MP4 demux path.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// No usable video track/sample tables were found in the MP4.
    #[error("no video tracks with sample tables found")]
    NoTracksFound,

    /// MP4 structure is malformed or violates expected ISO-BMFF invariants.
    #[error("mp4 parse error in {context}: box {box_type} at offset {offset}: {message}")]
    Mp4InvalidBox {
        context: String,
        box_type: String,
        offset: u64,
        message: String,
    },

    /// Required tables/structures for extraction are missing.
    #[error("mp4 missing required sample tables: {missing}")]
    Mp4MissingSampleTables { missing: String },

    /// MP4 sample tables are internally inconsistent.
    #[error(
        "mp4 inconsistent sample tables: sample_sizes={sample_sizes} derived_offsets={sample_offsets} chunk_offsets={chunk_offsets}"
    )]
    Mp4InconsistentSampleTables {
        sample_sizes: usize,
        sample_offsets: usize,
        chunk_offsets: usize,
    },

    /// Requested sample index is outside the available range.
    #[error("sample index out of range: {sample_index} (total_samples={total_samples})")]
    SampleIndexOutOfRange {
        sample_index: usize,
        total_samples: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
