//! Settings for codecs, connections, capture files and logging.
//!
//! A [`ProtocolConfig`] comes from TOML (a file or a string), from
//! `PACKET_PROTOCOL_*` environment variables, or from `Default`. Nothing is
//! checked while loading; call [`ProtocolConfig::validate`] to list problems.

use crate::capture::OutputType;
use crate::core::packet::HEADER_LEN;
use crate::core::serialization::SerializedFormat;
use crate::error::{ProtocolError, Result};
use crate::protocol::dialect::PacketDialect;
use crate::utils::crypto::CipherSuite;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Max allowed frame size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes pulled from a socket per read attempt
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Magic bytes opening every capture file
pub const CAPTURE_MAGIC: [u8; 4] = *b"PPAC";

/// Capture format version written by this library; the highest one it reads
pub const CAPTURE_VERSION: u8 = 4;

const ENV_PREFIX: &str = "PACKET_PROTOCOL_";

/// Every setting of the library, grouped by concern.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Packet codec configuration
    #[serde(default)]
    pub codec: CodecConfig,

    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Capture file configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Read and parse a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ProtocolError::ConfigError(format!("Invalid TOML: {e}")))
    }

    /// Defaults overridden by `PACKET_PROTOCOL_*` variables.
    ///
    /// Unparsable dialect, format or cipher names are errors; an unparsable timeout
    /// is ignored.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(format!("{ENV_PREFIX}{name}")).ok();
        let mut config = Self::default();

        if let Some(dialect) = var("DIALECT") {
            config.codec.dialect = dialect.parse()?;
        }
        if let Some(format) = var("FORMAT") {
            config.codec.format = format.parse()?;
        }
        if let Some(address) = var("ADDRESS") {
            config.connection.address = address;
        }
        if let Some(ms) = var("CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.connection.connect_timeout = Duration::from_millis(ms);
        }
        config.connection.decrypt_key = var("DECRYPT_KEY").map(PathBuf::from);
        config.connection.encrypt_key = var("ENCRYPT_KEY").map(PathBuf::from);
        if let Some(cipher) = var("CIPHER") {
            config.connection.cipher = cipher.parse()?;
        }
        if let Some(flag) = var("CAPTURE_COMPRESS") {
            config.capture.compress = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    /// Defaults with `mutator` applied.
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// The default configuration rendered as TOML.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Cannot render config: {e}")))?;
        std::fs::write(path, text).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot write {}: {e}", path.display()))
        })
    }

    /// Every problem found across all sections; empty when the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        [
            self.codec.validate(),
            self.connection.validate(),
            self.capture.validate(),
            self.logging.validate(),
        ]
        .concat()
    }

    /// [`validate`](Self::validate) folded into a single `ConfigError`.
    pub fn validate_strict(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            problems.join("\n  - ")
        )))
    }
}

/// Packet codec configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Dialect new codecs start with
    pub dialect: PacketDialect,

    /// Serialized format new codecs start with
    pub format: SerializedFormat,

    /// Formats callers may select
    pub enabled_formats: Vec<SerializedFormat>,

    /// Decode unknown tags as `Unknown` packets instead of failing
    #[serde(default)]
    pub allow_unknown_packets: bool,

    /// Append a NUL byte after JSON output
    #[serde(default)]
    pub json_nul_terminator: bool,

    /// Largest frame accepted or produced
    pub max_frame_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            dialect: PacketDialect::default(),
            format: SerializedFormat::default(),
            enabled_formats: SerializedFormat::ALL.to_vec(),
            allow_unknown_packets: false,
            json_nul_terminator: false,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl CodecConfig {
    /// Validate codec configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.enabled_formats.is_empty() {
            errors.push("At least one serialized format must be enabled".to_string());
        } else if !self.enabled_formats.contains(&self.format) {
            errors.push(format!(
                "Default format {} is not in enabled_formats",
                self.format
            ));
        }

        if self.max_frame_size < HEADER_LEN {
            errors.push(format!(
                "Max frame size too small: {} (minimum: {HEADER_LEN})",
                self.max_frame_size
            ));
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (frame lengths are 32-bit)",
                self.max_frame_size
            ));
        }

        errors
    }
}

/// Connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Address used by `create_stream`/`create_listener` callers that do not pass one
    pub address: String,

    /// Upper bound for establishing an outbound stream
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Bytes requested from the socket per read attempt
    pub read_chunk_size: usize,

    /// Switch new sockets to nonblocking mode
    pub nonblocking: bool,

    /// PEM-encoded PKCS#8 private key decrypting inbound key exchanges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decrypt_key: Option<PathBuf>,

    /// PEM-encoded public key encrypting outbound key exchanges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt_key: Option<PathBuf>,

    /// Cipher sealing frames once a key exchange completes
    #[serde(default)]
    pub cipher: CipherSuite,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:12200"),
            connect_timeout: Duration::from_secs(5),
            read_chunk_size: DEFAULT_READ_CHUNK,
            nonblocking: true,
            decrypt_key: None,
            encrypt_key: None,
            cipher: CipherSuite::default(),
        }
    }
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Connection address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid connection address format: '{}' (expected format: '127.0.0.1:12200')",
                self.address
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.read_chunk_size < 64 {
            errors.push("Read chunk size too small (minimum: 64 bytes)".to_string());
        } else if self.read_chunk_size > 1024 * 1024 {
            errors.push("Read chunk size too large (maximum: 1 MB)".to_string());
        }

        for (name, path) in [("decrypt_key", &self.decrypt_key), ("encrypt_key", &self.encrypt_key)] {
            if let Some(path) = path {
                if !path.exists() {
                    errors.push(format!("{name} file does not exist: {}", path.display()));
                }
            }
        }

        errors
    }
}

/// Capture file configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Compress records of new capture files with zstd
    pub compress: bool,

    /// zstd level for compressed captures
    pub compression_level: i32,

    /// What readers materialize per record
    pub output: OutputType,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            compress: false,
            compression_level: 3,
            output: OutputType::Packet,
        }
    }
}

impl CaptureConfig {
    /// Validate capture configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.compress && !(1..=22).contains(&self.compression_level) {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 1-22)",
                self.compression_level
            ));
        }

        errors
    }
}

/// Where and how tracing output goes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Reported in the startup event
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    pub log_to_file: bool,

    /// Required when `log_to_file` is set; the file is appended to
    pub log_file_path: Option<String>,

    /// One JSON object per event instead of the human-readable format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: env!("CARGO_PKG_NAME").to_string(),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.app_name.len() {
            0 => errors.push("app_name cannot be empty".to_string()),
            n if n > 64 => errors.push(format!("app_name is {n} characters (maximum: 64)")),
            _ => {}
        }

        if !self.log_to_console && !self.log_to_file {
            errors.push("At least one logging output must be enabled".to_string());
        }

        if self.log_to_file {
            let dir = self
                .log_file_path
                .as_deref()
                .map(|path| Path::new(path).parent().unwrap_or(Path::new("")));
            match dir {
                None => errors.push("log_file_path must be specified with log_to_file".to_string()),
                Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
                    errors.push(format!("Log directory {} does not exist", dir.display()));
                }
                Some(_) => {}
            }
        }

        errors
    }
}

/// `Duration` stored as whole milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// `tracing::Level` stored as its lowercase name.
mod log_level_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Level, D::Error> {
        let name = String::deserialize(d)?;
        name.parse()
            .map_err(|_| D::Error::custom(format!("unknown log level '{name}'")))
    }
}
