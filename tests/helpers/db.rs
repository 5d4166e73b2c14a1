use scopekeeper::settings::Database as DbCfg;
use scopekeeper::storage::IdentityStore;
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    store: IdentityStore,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let cfg = DbCfg {
            url: format!("sqlite://{}?mode=rwc", db_path),
            ..DbCfg::default()
        };

        // Connect and run migrations
        let store = IdentityStore::connect(&cfg)
            .await
            .expect("Failed to connect to test database");

        Self {
            store,
            _temp_file: temp_file,
        }
    }

    /// Get the identity store
    pub fn store(&self) -> &IdentityStore {
        &self.store
    }
}
