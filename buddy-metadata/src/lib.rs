// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The shared data model for the buddy installation engine: manifest
//! entities, persisted installation metadata, transaction/checkpoint/snapshot
//! records, the environment report, and the typed error model. No filesystem
//! or process I/O lives here — that belongs to the `buddy` engine crate.

pub mod environment;
pub mod error;
pub mod manifest;
pub mod metadata;
pub mod result;
pub mod transaction;
pub mod version;

pub use error::{Error, ErrorKind, Result};
