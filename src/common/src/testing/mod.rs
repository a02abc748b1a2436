//! Test utilities shared by the backup crates.
//!
//! Only compiled for tests or with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .with_source("proj", "production")
//!     .with_retain_count(3)
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;
