//! Backend implementations.
//!
//! Each backend is gated behind a feature flag.
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | `memory` | Shared in-process stack, used for tests and as the reference driver |

#[cfg(feature = "memory")]
pub mod memory;
