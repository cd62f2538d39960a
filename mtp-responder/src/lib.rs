// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP responder engine.
 */

#![warn(missing_docs)]

//! # MTP responder engine
//!
//! An MTP (ISO 15740 / PTP family) responder exposing one or more
//! filesystem volumes to a USB host: the wire codec, the packet layer
//! with double-buffered bulk streaming, the lazily built object graph,
//! per-volume storages behind a unified handle space, and the command
//! dispatcher servicing one host transaction at a time.
//!
//! The USB device stack and the backing filesystems are consumed through
//! the [`mtp::Transport`] and [`vfs::Filesystem`] traits; wiring up
//! endpoints and volumes is the embedding application's job.
//!
//! ```no_run
//! use mtp::StorageId;
//! use mtp_responder::storage::{Storage, StorageInfo, StorageManager};
//! use mtp_responder::vfs::HostFs;
//!
//! let mut storages = StorageManager::new();
//! storages.add_storage(Storage::new(
//!     Box::new(HostFs::new("/srv/share")),
//!     StorageId::new(1, 1),
//!     StorageInfo::default(),
//! ));
//! // hand `storages` and the platform's USB transport to `Server::new`,
//! // then drive transactions with `Server::run`
//! ```

pub mod codec;
pub mod object;
pub mod packet;
pub mod props;
pub mod server;
pub mod storage;
mod util;
pub mod vfs;

pub use server::Server;

/// Outcome of one operation handler: either a value to answer with, or
/// the response code reporting why the operation failed. Handlers never
/// panic across the dispatch boundary.
pub type CommandResult<T = ()> =
    core::result::Result<T, mtp::ResponseCode>;
