//! # Utility Modules
//!
//! Supporting pieces shared by the codec and the transports.
//!
//! ## Components
//! - **Buffer Pool**: reusable owned buffers with drop-based release
//! - **Compression**: zlib, LZ4 and Zstd behind one status-reporting API
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: global atomic counters for packets, bytes and failures

pub mod buffer_pool;
pub mod compression;
pub mod logging;
pub mod metrics;

pub use buffer_pool::{BufferPool, PooledBuffer};
