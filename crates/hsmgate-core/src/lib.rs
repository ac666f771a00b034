//! # hsmgate Core
//!
//! Shared types for the hsmgate checksum and stat services, which sit between
//! a hierarchical storage system and a file-transfer protocol server.
//!
//! This crate provides:
//! - The storage backend contract and its native records
//! - The protocol stat record delivered to the server
//! - The operation (server) reporting contract
//! - Error types and runtime configuration
//! - An in-memory backend and, on Linux, a local filesystem backend
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            transfer protocol server           │
//! │        (Operation: markers, outcomes)         │
//! ├──────────────────────┬───────────────────────┤
//! │    hsmgate-files     │     hsmgate-stat      │
//! │  (checksum pipeline) │  (stat translation)   │
//! ├──────────────────────┴───────────────────────┤
//! │               StorageBackend                  │
//! │     (archive namespace, data, attributes)     │
//! └──────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod config;
pub mod error;
pub mod fault;
#[cfg(target_os = "linux")]
pub mod local;
pub mod memory;
pub mod operation;
pub mod record;

pub use backend::{
    DirAttributes, DirRead, FileHandle, NativeAttrs, NativeDirEntry, NativeStat, ObjectHandle,
    ObjectType, OpenFile, StorageBackend,
};
pub use config::{
    ChecksumAlgorithm, ChecksumConfig, DEFAULT_APP_TAG, DEFAULT_BLOCK_SIZE, DEFAULT_PAGE_SIZE,
    MAX_STRIPE_WIDTH, StatConfig,
};
pub use error::{BackendResult, Errno, Error, Result};
pub use fault::FaultCounter;
#[cfg(target_os = "linux")]
pub use local::LocalBackend;
pub use memory::{BackendOp, MemoryBackend};
pub use operation::{Finished, Operation, RecordingOperation};
pub use record::{ProtocolStat, base_name};
