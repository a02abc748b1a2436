pub mod checksum;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod redact;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{Configuration, Secret};
pub use error::ErrorKind;
pub use redact::Redactor;
pub use retry::{RetryHooks, RetryPolicy};
