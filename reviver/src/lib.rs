// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! reviver is primarily an application. The library API exists so that the
//! integration tests can drive the codecs and the objective engine directly,
//! and can change at any time.
//!
//! The CLI source files use concrete types wherever possible for simplicity,
//! while the "library"-style source files are generic over the executor and
//! console so that device interaction can be faked.

pub mod cli;
pub mod config;
pub mod device;
pub mod executor;
pub mod fingerprint;
pub mod format;
pub mod objective;
pub mod octal;
pub mod patch;
pub mod ramdisk;
pub mod stream;
pub mod unpacked;
pub mod util;
