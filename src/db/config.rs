//! Repository configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Path value that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Repository configuration options.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Path to the SQLite database file, or [`IN_MEMORY`].
    pub path: PathBuf,
    /// Bootstrap the schema when the tables are absent.
    pub create_if_missing: bool,
    /// Initialise as a bare repository. Only `true` is supported.
    pub bare: bool,
    /// Branch `HEAD` points at after bootstrap.
    pub default_branch: String,
    /// Objects at least this large are streamed in chunks instead of buffered.
    pub stream_threshold: u64,
    /// Chunk size used when streaming large objects.
    pub stream_chunk_size: usize,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repository.db"),
            create_if_missing: true,
            bare: true,
            default_branch: "master".to_string(),
            stream_threshold: 8 * 1024 * 1024,
            stream_chunk_size: 64 * 1024,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl RepositoryConfig {
    /// Create a new configuration with the given database path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Configuration for a throwaway in-memory repository.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    /// Whether this configuration points at an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set bare flag.
    pub fn bare(mut self, value: bool) -> Self {
        self.bare = value;
        self
    }

    /// Set the default branch short name.
    pub fn default_branch(mut self, name: impl Into<String>) -> Self {
        self.default_branch = name.into();
        self
    }

    /// Set the streaming threshold in bytes.
    pub fn stream_threshold(mut self, bytes: u64) -> Self {
        self.stream_threshold = bytes;
        self
    }

    /// Set the streaming chunk size in bytes.
    pub fn stream_chunk_size(mut self, bytes: usize) -> Self {
        self.stream_chunk_size = bytes.max(1);
        self
    }

    /// Set the busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}
