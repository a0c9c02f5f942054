//! Loading serde configuration structs from YAML or JSON files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Failed to get file extension for {0}")]
    MissingFileExtension(PathBuf),
    #[error("Unsupported config file extension for file: {0}")]
    UnsupportedFileExtension(PathBuf),
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML config parsing failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON config parsing failed")]
    Json(#[from] serde_json::Error),
}

pub type ConfigFileResult<T> = Result<T, ConfigFileError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> ConfigFileResult<Self> {
        let ext = path
            .extension()
            .and_then(|os_str| os_str.to_str())
            .ok_or_else(|| ConfigFileError::MissingFileExtension(path.to_path_buf()))?;

        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(ConfigFileError::UnsupportedFileExtension(
                path.to_path_buf(),
            ))
        }
    }

    pub fn parse<T: DeserializeOwned + 'static>(self, text: &str) -> ConfigFileResult<T> {
        match self {
            Self::Yaml => Ok(serde_yml::from_str(text)?),
            Self::Json => Ok(serde_json::from_str(text)?),
        }
    }
}

/// Read and deserialize a config file, picking the format from its extension.
pub fn load_config<T: DeserializeOwned + 'static>(path: &Path) -> ConfigFileResult<T> {
    let format = ConfigFormat::from_path(path)?;
    let text = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), ?format, "Loading config file");
    format.parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        count: u32,
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a/b.yaml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("b.YML")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("c.json")).unwrap(),
            ConfigFormat::Json
        );
    }

    #[test]
    fn test_format_rejects_unknown_or_missing_extension() {
        assert!(matches!(
            ConfigFormat::from_path(Path::new("config.toml")),
            Err(ConfigFileError::UnsupportedFileExtension(_))
        ));
        assert!(matches!(
            ConfigFormat::from_path(Path::new("config")),
            Err(ConfigFileError::MissingFileExtension(_))
        ));
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml: Sample = ConfigFormat::Yaml.parse("name: blend\ncount: 3\n").unwrap();
        assert_eq!(
            yaml,
            Sample {
                name: "blend".to_string(),
                count: 3
            }
        );

        let json: Sample = ConfigFormat::Json.parse(r#"{"name": "blend"}"#).unwrap();
        assert_eq!(json.count, 0);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.yml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "name: pair").unwrap();
        writeln!(file, "count: 2").unwrap();
        drop(file);

        let sample: Sample = load_config(&path).unwrap();
        assert_eq!(sample.name, "pair");
        assert_eq!(sample.count, 2);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config::<Sample>(Path::new("/nonexistent/dir/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigFileError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/dir/config.yaml"));
    }
}
