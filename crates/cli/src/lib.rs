// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal operator console for a sluice-managed session.

pub mod command;
pub mod config;
pub mod console;
