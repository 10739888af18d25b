pub mod config;
pub mod error;
pub mod logging;
pub mod output;

pub use config::{BridgeConfig, CREDENTIALS_FILE_NAME, DEFAULT_BINARY_PORT};
pub use error::{AnylistError, Result};
pub use output::{OutputLine, OutputRingBuffer, OutputStream};
