//! INI file configuration adapter.

use crate::domain::error::PriceVaultError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PriceVaultError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| PriceVaultError::ConfigParse {
                file: path.display().to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, PriceVaultError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| PriceVaultError::ConfigParse {
                file: "<string>".into(),
                reason,
            })?;
        Ok(Self { config })
    }

    /// No sections at all; every lookup falls back to its default.
    pub fn empty() -> Self {
        Self { config: Ini::new() }
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key).filter(|v| !v.trim().is_empty())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    const FULL: &str = r#"
[sqlite]
path = /var/lib/pricevault/prices.db
pool_size = 8

[cache]
enabled = yes
max_size = 64
ttl_seconds = 600

[pipeline]
outlier_threshold = 0.15
missing_strategy = interpolate

[calendar]
timezone = Asia/Hong_Kong
holidays = 2025-01-01, 2025-01-29
"#;

    #[test]
    fn from_string_parses_every_section() {
        let adapter = FileConfigAdapter::from_string(FULL).unwrap();
        assert_eq!(
            adapter.get_string("sqlite", "path"),
            Some("/var/lib/pricevault/prices.db".to_string())
        );
        assert_eq!(adapter.get_int("sqlite", "pool_size", 4), 8);
        assert!(adapter.get_bool("cache", "enabled", false));
        assert_eq!(adapter.get_int("cache", "ttl_seconds", 3600), 600);
        assert_eq!(adapter.get_double("pipeline", "outlier_threshold", 0.2), 0.15);
        assert_eq!(
            adapter.get_string("calendar", "holidays"),
            Some("2025-01-01, 2025-01-29".to_string())
        );
    }

    #[test]
    fn missing_keys_fall_back() {
        let adapter = FileConfigAdapter::from_string("[cache]\n").unwrap();
        assert_eq!(adapter.get_string("cache", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
        assert_eq!(adapter.get_int("cache", "max_size", 128), 128);
        assert_eq!(adapter.get_double("pipeline", "outlier_threshold", 0.2), 0.2);
        assert!(adapter.get_bool("cache", "enabled", true));
    }

    #[test]
    fn non_numeric_values_fall_back() {
        let adapter =
            FileConfigAdapter::from_string("[cache]\nmax_size = lots\nttl_seconds = 1.5x\n")
                .unwrap();
        assert_eq!(adapter.get_int("cache", "max_size", 42), 42);
        assert_eq!(adapter.get_double("cache", "ttl_seconds", 9.0), 9.0);
    }

    #[test]
    fn blank_string_is_missing() {
        let adapter = FileConfigAdapter::from_string("[calendar]\nsession_open =\n").unwrap();
        assert_eq!(adapter.get_string("calendar", "session_open"), None);
    }

    #[test]
    fn bool_spellings() {
        let adapter = FileConfigAdapter::from_string(
            "[flags]\na = true\nb = YES\nc = 1\nd = off\ne = no\nf = maybe\n",
        )
        .unwrap();
        assert!(adapter.get_bool("flags", "a", false));
        assert!(adapter.get_bool("flags", "b", false));
        assert!(adapter.get_bool("flags", "c", false));
        assert!(!adapter.get_bool("flags", "d", true));
        assert!(!adapter.get_bool("flags", "e", true));
        assert!(adapter.get_bool("flags", "f", true));
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[logging]\nlevel = debug\nformat = json\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(adapter.get_string("logging", "format"), Some("json".into()));
    }

    #[test]
    fn missing_file_is_a_parse_error() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        match result {
            Err(PriceVaultError::ConfigParse { file, .. }) => {
                assert_eq!(file, "/nonexistent/path/config.ini");
            }
            Err(other) => panic!("expected ConfigParse, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn empty_adapter_has_nothing() {
        let adapter = FileConfigAdapter::empty();
        assert_eq!(adapter.get_string("sqlite", "path"), None);
    }
}
