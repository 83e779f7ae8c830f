//! Wishcake: AI birthday wishes with a microphone-driven candle blowing,
//! song picking and cake cutting celebration.
//! Library: domain modules plus tracing setup shared by the binary.

pub mod audio;
pub mod cancellation;
pub mod card;
pub mod celebration;
pub mod config;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod sampler;
pub mod state_machine;
pub mod wish;

pub use error::{Error, Result};

/// Initialize tracing. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wishcake=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}
