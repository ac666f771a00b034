//! # hsmgate Files
//!
//! Checksum engine for hsmgate.
//!
//! This crate provides:
//! - A striped parallel read driver with typed block and range events
//! - MD5 and BLAKE3 digests behind one incremental interface
//! - Periodic progress markers during long computations
//! - Stored checksums in user-defined attributes
//! - The checksum pipeline tying these together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attrs;
pub mod checksum;
pub mod digest;
pub mod marker;
pub mod pio;

pub use attrs::{AttributeStore, ChecksumState, StoredChecksum};
pub use checksum::{ChecksumPipeline, ChecksumRequest, ChecksumTransfer, DigestFactory, RangeLength};
pub use digest::{Blake3Digest, Digest, Md5Digest, new_digest, to_hex};
pub use marker::{MarkerCounter, ProgressMarker};
pub use pio::{BlockControl, PioMode, PioSink, RangeWindow, StripedReader};
