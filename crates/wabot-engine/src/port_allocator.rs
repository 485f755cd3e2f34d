// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Port allocator.
//!
//! Monotonic counter handing out worker control ports. Ports are never
//! reclaimed and the counter is not persisted, so it restarts from its seed
//! whenever the engine does.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

/// Hands out strictly increasing ports starting at `seed + 1`.
#[derive(Debug)]
pub struct PortAllocator {
    last: AtomicU32,
}

impl PortAllocator {
    /// Create an allocator whose first port is `seed + 1`.
    pub fn new(seed: u16) -> Self {
        Self {
            last: AtomicU32::new(u32::from(seed)),
        }
    }

    /// Next unused port.
    pub fn allocate(&self) -> Result<u16> {
        let next = self.last.fetch_add(1, Ordering::SeqCst) + 1;
        u16::try_from(next).map_err(|_| Error::Other("Port range exhausted".to_string()))
    }
}
