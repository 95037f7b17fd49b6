// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Typed configuration schema for the orchestration core.
//!
//! This crate owns only the *types* a config layer deserializes into. File
//! discovery, layered merging, and CLI-flag overrides are outer-surface
//! concerns the core does not implement.
mod schema;

pub use schema::*;
