// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Caravel integration tests.
//!
//! [`MockInstance`] wraps a wiremock server behind the same surface an
//! [`InstanceClient`] talks to, with helpers for the endpoint shapes the
//! migration exercises. The underlying server stays public so tests can
//! mount custom expectations (call counts, failure sequences) directly.

pub mod mock_instance;

pub use mock_instance::MockInstance;
