pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod logging;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use config::*;
pub use errors::*;
pub use logging::init_logging;
pub use retry::{with_breaker_and_retry, with_retry, RetryPolicy};
