// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! pipegraph-modules: a handful of representative concrete pipes built on
//! `pipegraph-core`, grounded on two worked examples from the reference
//! implementation's own test suite.
//!
//! - [`pes_decaps`]: a PES-decapsulation pipe (scenario S3), grounded on
//!   `examples/original_source/tests/upipe_ts_pes_decaps_test.c`.
//! - [`cross_blend`]: a bin/sub-pipe audio cross-fader (scenario S4),
//!   grounded on `examples/original_source/lib/upipe-modules/upipe_cross_blend.c`.
//!
//! Neither is meant to cover its real-world module family exhaustively —
//! per spec.md's non-goals, concrete pipe implementations are out of scope
//! except as needed to exercise `pipegraph-core`'s sub/bin-pipe and probe
//! machinery end to end.

pub mod cross_blend;
pub mod pes_decaps;

pub use cross_blend::{CrossBlend, CrossBlendInput};
pub use pes_decaps::PesDecaps;
