use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Reads the `[ingest]`, `[tee]` and `[work]` sections from `path`.
///
/// Missing sections and keys take their defaults. `INTAKE_<SECTION>__<KEY>`
/// environment variables override the file, e.g.
/// `INTAKE_TEE__DIGEST=md5` or `INTAKE_INGEST__ADMISSION_WINDOW=8`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("INTAKE_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Parses a TOML document without consulting the environment.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::DigestAlgorithm;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[ingest]
admission_window = 8

[tee]
header_size = 512
digest = "md5"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.ingest.admission_window, 8);
        assert_eq!(config.tee.header_size, 512);
        assert_eq!(config.tee.digest, DigestAlgorithm::Md5);
        assert_eq!(config.work.ordered_limit, 4);
    }

    #[test]
    fn test_load_config_from_str_empty() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.ingest.admission_window, 4);
        assert_eq!(config.tee.header_size, 1024);
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[ingest]
admission_window = "many"
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[ingest]
storage_root = "/var/lib/intake"
manifest = false

[work]
ordered_limit = 2
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.ingest.storage_root, PathBuf::from("/var/lib/intake"));
        assert!(!config.ingest.manifest);
        assert_eq!(config.work.ordered_limit, 2);
    }
}
