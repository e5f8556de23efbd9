//! Shared proptest configuration for consistent test behavior across crates.
//!
//! ```rust,ignore
//! use cairn_testing::proptest_config;
//!
//! proptest! {
//!     #![proptest_config(proptest_config::auto_config())]
//!
//!     #[test]
//!     fn my_property(x in 0..100i32) {
//!         // ...
//!     }
//! }
//! ```
//!
//! Set `PROPTEST_CASES` to control thoroughness: 64 for quick checks,
//! a few thousand for soak runs.

use proptest::prelude::*;

/// Small case count for fast feedback.
pub fn ci_config() -> ProptestConfig {
    ProptestConfig {
        cases: 64,
        max_shrink_iters: 100,
        ..ProptestConfig::default()
    }
}

/// Case count from `PROPTEST_CASES`, 256 when unset.
pub fn auto_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);

    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}
