//! Connection configuration.

use crate::ffi;
use serde::{Deserialize, Serialize};
use sqlqueue_core::{ConfigError, DateFormat, Error, Result};
use std::ffi::c_int;
use std::path::PathBuf;
use std::time::Duration;

/// Where the database lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    /// A database file at this path (or a `file:` URI when URI flags are set).
    Path(PathBuf),
    /// An anonymous on-disk database, deleted when the connection closes.
    Temporary,
    /// A private in-memory database, destroyed when the connection closes.
    #[default]
    InMemory,
}

impl Location {
    /// The filename string handed to the native open call.
    pub fn as_open_target(&self) -> String {
        match self {
            Location::Path(path) => path.to_string_lossy().into_owned(),
            Location::Temporary => String::new(),
            Location::InMemory => ":memory:".to_string(),
        }
    }
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open as an in-memory database even when a filename is given.
    pub memory: bool,
    /// Open in multi-thread mode (connections not shared between threads).
    pub no_mutex: bool,
    /// Open in serialized mode (connections can be shared).
    pub full_mutex: bool,
    /// Enable shared cache mode.
    pub shared_cache: bool,
    /// Disable shared cache mode.
    pub private_cache: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Reject combinations the native open call refuses or treats as
    /// undefined.
    pub fn validate(self) -> Result<()> {
        let conflict = if self.read_only && (self.read_write || self.create) {
            Some("read_only cannot be combined with read_write or create")
        } else if self.no_mutex && self.full_mutex {
            Some("no_mutex and full_mutex are mutually exclusive")
        } else if self.shared_cache && self.private_cache {
            Some("shared_cache and private_cache are mutually exclusive")
        } else {
            None
        };
        match conflict {
            Some(message) => Err(config_error(format!("invalid open flags: {}", message))),
            None => Ok(()),
        }
    }

    pub(crate) fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.memory {
            flags |= ffi::SQLITE_OPEN_MEMORY;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }
        if self.shared_cache {
            flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
        }
        if self.private_cache {
            flags |= ffi::SQLITE_OPEN_PRIVATECACHE;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

/// Configuration for a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Database location.
    pub location: Location,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Name of the VFS module to open with, if not the default.
    pub vfs: Option<String>,
    /// How long a blocked statement keeps retrying before surfacing BUSY,
    /// in milliseconds. Zero disables the retry handler.
    pub busy_timeout_ms: u64,
    /// Reuse compiled statements across executions of the same SQL text.
    pub cache_statements: bool,
    /// Store dates as text in this format instead of epoch seconds.
    pub date_format: Option<DateFormat>,
    /// Log every error surfaced to the caller.
    pub log_errors: bool,
    /// Abort the process as soon as an error is surfaced.
    pub crash_on_errors: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            location: Location::InMemory,
            flags: OpenFlags::create_read_write(),
            vfs: None,
            busy_timeout_ms: 0,
            cache_statements: false,
            date_format: None,
            log_errors: true,
            crash_on_errors: false,
        }
    }
}

impl ConnectionConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Path(path.into()),
            ..Default::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a new config for a temporary on-disk database.
    pub fn temporary() -> Self {
        Self {
            location: Location::Temporary,
            ..Default::default()
        }
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Open through a named VFS.
    pub fn vfs(mut self, name: impl Into<String>) -> Self {
        self.vfs = Some(name.into());
        self
    }

    /// Set the busy-retry budget.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable statement caching.
    pub fn cache_statements(mut self, enabled: bool) -> Self {
        self.cache_statements = enabled;
        self
    }

    /// Store dates as formatted text.
    pub fn date_format(mut self, format: DateFormat) -> Self {
        self.date_format = Some(format);
        self
    }

    /// Log every surfaced error.
    pub fn log_errors(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    /// Abort the process on the first surfaced error.
    pub fn crash_on_errors(mut self, enabled: bool) -> Self {
        self.crash_on_errors = enabled;
        self
    }

    /// Check the flags and VFS name before they reach the native open call.
    pub fn validate(&self) -> Result<()> {
        validate_open(self.flags, self.vfs.as_deref())
    }

    /// The busy-retry budget as a duration.
    pub fn busy_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

pub(crate) fn validate_open(flags: OpenFlags, vfs: Option<&str>) -> Result<()> {
    flags.validate()?;
    if vfs.is_some_and(str::is_empty) {
        return Err(config_error("VFS name must not be empty; use None for the default VFS"));
    }
    Ok(())
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_targets() {
        assert_eq!(Location::InMemory.as_open_target(), ":memory:");
        assert_eq!(Location::Temporary.as_open_target(), "");
        assert_eq!(
            Location::Path(PathBuf::from("/tmp/x.db")).as_open_target(),
            "/tmp/x.db"
        );
    }

    #[test]
    fn test_flags_default_to_read_write_create() {
        let flags = OpenFlags::default().to_sqlite_flags();
        assert_eq!(
            flags,
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE
        );
        let ro = OpenFlags::read_only().to_sqlite_flags();
        assert_eq!(ro, ffi::SQLITE_OPEN_READONLY);
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = ConnectionConfig::file("/tmp/a.db")
            .busy_timeout(Duration::from_secs(2))
            .cache_statements(true)
            .date_format(DateFormat::Rfc3339)
            .log_errors(false);
        assert_eq!(config.busy_timeout_ms, 2000);
        assert_eq!(config.busy_timeout_duration(), Duration::from_secs(2));
        assert!(config.cache_statements);
        assert!(!config.log_errors);
        assert_eq!(config.date_format, Some(DateFormat::Rfc3339));
    }

    #[test]
    fn test_conflicting_flags_are_config_errors() {
        let flags = OpenFlags {
            read_only: true,
            create: true,
            ..Default::default()
        };
        assert!(matches!(flags.validate(), Err(Error::Config(_))));

        let flags = OpenFlags {
            no_mutex: true,
            full_mutex: true,
            ..OpenFlags::create_read_write()
        };
        assert!(matches!(flags.validate(), Err(Error::Config(_))));

        assert!(OpenFlags::read_only().validate().is_ok());
        assert!(OpenFlags::create_read_write().validate().is_ok());
    }

    #[test]
    fn test_empty_vfs_name_is_rejected() {
        let err = ConnectionConfig::memory().vfs("").validate().unwrap_err();
        assert!(matches!(err, Error::Config(ref e) if e.message.contains("VFS")));
        assert!(ConnectionConfig::memory().vfs("unix").validate().is_ok());
        assert!(ConnectionConfig::memory().validate().is_ok());
    }
}
