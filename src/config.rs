use crate::core::db::Credentials;
use crate::core::{DbError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub session: SessionConfig,
}

/// Default connection credentials, used wherever a call site omits them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    /// Database name; for SQLite, the database file path
    pub name: String,
    pub port: u16,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: "localhost".to_string(),
            user: String::new(),
            password: String::new(),
            name: ":memory:".to_string(),
            port: 3306,
        }
    }
}

impl DatabaseConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            host: self.host.clone(),
            username: self.user.clone(),
            password: self.password.clone(),
            database: self.name.clone(),
            port: self.port,
        }
    }
}

/// Session behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Failed connection attempts after which a session stops trying
    pub failed_connections_threshold: u32,
    /// Keep a live log of every executed query
    pub keep_live_log: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            failed_connections_threshold: 10,
            keep_live_log: false,
        }
    }
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| DbError::Config(e.to_string()))
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = paramdb::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// `<user config dir>/paramdb/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("paramdb").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
[database]
host = "db.internal"
user = "app"
password = "secret"
name = "/var/lib/app/app.db"
port = 3307

[session]
failed_connections_threshold = 3
keep_live_log = true
"#;

    #[test]
    fn test_parse_config_from_str() {
        let config = parse_config(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 3307);
        assert_eq!(config.session.failed_connections_threshold, 3);
        assert!(config.session.keep_live_log);

        let creds = config.database.credentials();
        assert_eq!(creds.username, "app");
        assert_eq!(creds.database, "/var/lib/app/app.db");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = parse_config("[database]\nname = \"x.db\"\n").unwrap();
        assert_eq!(config.database.name, "x.db");
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.session.failed_connections_threshold, 10);
        assert!(!config.session.keep_live_log);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        match parse_config("[database\nport = ") {
            Err(DbError::Config(_)) => {}
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.database.user, "app");

        assert!(matches!(
            load_config("/nonexistent/paramdb.toml"),
            Err(DbError::Io(_))
        ));
    }

    #[test]
    fn test_default_config_path_shape() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("paramdb/config.toml"));
        }
    }
}
