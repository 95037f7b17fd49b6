// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors raised at the Permission Broker's public boundary.
///
/// `request()` itself resolves to a plain `bool` per the broker contract
/// (true = proceed); this enum exists for callers that want to propagate a
/// denial as a typed error (e.g. a tool handler mapping it to the
/// `permission-denied` error kind) rather than branching on a bool.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission denied")]
    Denied,
    #[error("permission request cancelled")]
    Cancelled,
}

impl PermissionError {
    /// Convert a broker resolution into a `Result`, `Ok(())` for a grant.
    pub fn from_granted(granted: bool) -> Result<(), PermissionError> {
        if granted {
            Ok(())
        } else {
            Err(PermissionError::Denied)
        }
    }
}
