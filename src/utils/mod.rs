pub mod logging;
pub mod retry;
#[cfg(test)]
pub(crate) mod test_server;

pub use logging::truncate_text;
pub use retry::{retry_with_backoff, RetryFailure, RetryPolicy};
