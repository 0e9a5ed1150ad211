// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel diagnostics: structured log line emission.

pub mod log;
