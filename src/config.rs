//! # Configuration Management
//!
//! Centralized configuration for the framing engine.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`GAMEWIRE_*`)
//!
//! ## Sections
//! - `codec`: compression threshold, algorithm and size limits
//! - `pipe`: capacity policy of the buffers between transport and codec
//! - `pool`: shared buffer pool sizing
//! - `logging`: subscriber setup
//!
//! The compression threshold configured here is only the initial value.
//! Reader and writer thresholds are switched independently at runtime
//! through [`CompressionThreshold`](crate::core::codec::CompressionThreshold).

use crate::error::{ProtocolError, Result};
use crate::transport::pipe::PipeCapacity;
use crate::utils::buffer_pool::{BufferPool, DEFAULT_MAX_POOLED_BUFFER_SIZE};
use crate::utils::compression::CompressionKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Threshold value meaning "compression disabled"
pub const COMPRESSION_DISABLED: i32 = -1;

/// Largest frame length a 3-byte VarInt can express (2^21 - 1)
pub const MAX_FRAME_LENGTH: usize = 2_097_151;

/// Largest declared uncompressed size accepted by default (2^23)
pub const MAX_UNCOMPRESSED_LENGTH: usize = 8_388_608;

/// Default pipe capacity before the producer is suspended (64KB)
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Default size of a single transport read
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WireConfig {
    /// Frame codec configuration
    #[serde(default)]
    pub codec: CodecConfig,

    /// Pipe and queue configuration
    #[serde(default)]
    pub pipe: PipeConfig,

    /// Buffer pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WireConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(threshold) = std::env::var("GAMEWIRE_COMPRESSION_THRESHOLD") {
            config.codec.compression_threshold = threshold.parse::<i32>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid GAMEWIRE_COMPRESSION_THRESHOLD: {e}"))
            })?;
        }

        if let Ok(level) = std::env::var("GAMEWIRE_COMPRESSION_LEVEL") {
            if let Ok(val) = level.parse::<u32>() {
                config.codec.compression_level = val;
            }
        }

        if let Ok(capacity) = std::env::var("GAMEWIRE_PIPE_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                let policy = if val == 0 {
                    PipeCapacity::Unbounded
                } else {
                    PipeCapacity::Bounded { bytes: val }
                };
                config.pipe.inbound = policy;
                config.pipe.outbound = policy;
            }
        }

        if let Ok(max) = std::env::var("GAMEWIRE_POOL_MAX_OUTSTANDING") {
            if let Ok(val) = max.parse::<usize>() {
                config.pool.max_outstanding = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.codec.validate());
        errors.extend(self.pipe.validate());
        errors.extend(self.pool.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Frame codec configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Initial compression threshold; negative disables compression
    pub compression_threshold: i32,

    /// Compression algorithm used for frames at or above the threshold
    pub compression: CompressionKind,

    /// Compression level passed to the algorithm
    pub compression_level: u32,

    /// Maximum accepted frame length (length prefix excluded)
    pub max_frame_length: usize,

    /// Maximum accepted declared uncompressed size
    pub max_uncompressed_length: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_threshold: COMPRESSION_DISABLED,
            compression: CompressionKind::Zlib,
            compression_level: 6,
            max_frame_length: MAX_FRAME_LENGTH,
            max_uncompressed_length: MAX_UNCOMPRESSED_LENGTH,
        }
    }
}

impl CodecConfig {
    /// Validate codec configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let (min, max) = self.compression.level_range();
        if self.compression_level < min || self.compression_level > max {
            errors.push(format!(
                "Invalid compression level: {} (valid range for {:?}: {}-{})",
                self.compression_level, self.compression, min, max
            ));
        }

        if self.max_frame_length == 0 {
            errors.push("Max frame length cannot be 0".to_string());
        } else if self.max_frame_length > i32::MAX as usize {
            errors.push(format!(
                "Max frame length too large: {} (must fit in a VarInt)",
                self.max_frame_length
            ));
        }

        if self.max_uncompressed_length == 0 {
            errors.push("Max uncompressed length cannot be 0".to_string());
        } else if self.max_uncompressed_length > i32::MAX as usize {
            errors.push(format!(
                "Max uncompressed length too large: {} (must fit in a VarInt)",
                self.max_uncompressed_length
            ));
        }

        if self.compression_threshold >= 0
            && self.compression_threshold as usize > self.max_uncompressed_length
        {
            errors.push(
                "Compression threshold cannot be larger than max uncompressed length".to_string(),
            );
        }

        errors
    }
}

/// Pipe and queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Bytes requested from the transport per read
    pub read_chunk_size: usize,

    /// Capacity of the outbound packet queue; `None` (or omitting the key)
    /// means unbounded
    #[serde(default)]
    pub send_queue: Option<usize>,

    /// Capacity policy of the transport -> decoder pipe
    pub inbound: PipeCapacity,

    /// Capacity policy of the encoder -> transport pipe
    pub outbound: PipeCapacity,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            send_queue: Some(1024),
            inbound: PipeCapacity::Bounded {
                bytes: DEFAULT_PIPE_CAPACITY,
            },
            outbound: PipeCapacity::Bounded {
                bytes: DEFAULT_PIPE_CAPACITY,
            },
        }
    }
}

impl PipeConfig {
    /// Validate pipe configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, policy) in [("Inbound", &self.inbound), ("Outbound", &self.outbound)] {
            if let PipeCapacity::Bounded { bytes: 0 } = policy {
                errors.push(format!("{name} pipe capacity must be greater than 0"));
            }
        }

        if self.read_chunk_size == 0 {
            errors.push("Read chunk size must be greater than 0".to_string());
        } else if self.read_chunk_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Read chunk size too large: {} (maximum: 16 MB)",
                self.read_chunk_size
            ));
        }

        if self.send_queue == Some(0) {
            errors.push("Send queue capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Buffer pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Buffers allocated up front
    pub preallocated: usize,

    /// Largest buffer capacity returned to the pool on release
    pub max_pooled_buffer_size: usize,

    /// Maximum buffers checked out at once; 0 means unlimited
    pub max_outstanding: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            preallocated: 50,
            max_pooled_buffer_size: DEFAULT_MAX_POOLED_BUFFER_SIZE,
            max_outstanding: 0,
        }
    }
}

impl PoolConfig {
    /// Build a pool from this configuration
    pub fn build(&self) -> BufferPool {
        BufferPool::with_limits(
            self.preallocated,
            self.max_pooled_buffer_size,
            self.max_outstanding,
        )
    }

    /// Validate pool configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.preallocated > 100_000 {
            errors.push(format!(
                "Preallocated buffer count very high: {} (maximum: 100,000)",
                self.preallocated
            ));
        }

        if self.max_outstanding != 0 && self.max_outstanding < self.preallocated {
            errors.push(
                "Max outstanding buffers cannot be smaller than the preallocated count"
                    .to_string(),
            );
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Path to log file; used when console logging is disabled
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("gamewire"),
            log_level: Level::INFO,
            log_to_console: true,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if let Some(ref path) = self.log_file_path {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    errors.push(format!(
                        "Log file directory does not exist: {}",
                        parent.display()
                    ));
                }
            }
        }

        if !self.log_to_console && self.log_file_path.is_none() {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
