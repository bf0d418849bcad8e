//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

#![allow(
    dead_code,
    reason = "each integration test binary uses a different subset"
)]

/// Subscription the test controllers run in.
pub const DEFAULT_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000001";

/// Resource group used when a request names none.
pub const DEFAULT_RESOURCE_GROUP: &str = "rg-blobvol";

/// One gibibyte, the size most tests request.
pub const GIB: u64 = 1024 * 1024 * 1024;
