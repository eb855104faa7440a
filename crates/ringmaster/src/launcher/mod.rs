// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launcher module - server and utility process backends.

pub mod mock;
pub mod process;
mod traits;

pub use mock::MockLauncher;
pub use process::ProcessLauncher;
pub use traits::*;
