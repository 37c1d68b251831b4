use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decompress::Compression;
use crate::error::ConfigError;
use crate::inspect::HashAlgorithm;

const DEFAULT_ARTIFACT_URL: &str =
    "https://geolite.maxmind.com/download/geoip/database/GeoLite2-Country.mmdb.gz";
const DEFAULT_TOKEN_URL: &str =
    "https://geolite.maxmind.com/download/geoip/database/GeoLite2-Country.md5";
const DEFAULT_ARTIFACT_NAME: &str = "GeoLite2-Country.mmdb";

/// Settings for one updater instance.
///
/// Every field has a default, so callers override only what they need:
///
/// ```
/// use geodb_core::UpdaterConfig;
///
/// let config = UpdaterConfig {
///     install_path: "/var/lib/geoip/country.mmdb".into(),
///     ..UpdaterConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    #[serde(default = "default_artifact_url")]
    pub artifact_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_compressed_path")]
    pub compressed_path: PathBuf,

    #[serde(default = "default_expanded_path")]
    pub expanded_path: PathBuf,

    #[serde(default = "default_install_path")]
    pub install_path: PathBuf,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub compression: Compression,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    #[serde(default)]
    pub seed_from_installed: bool,
}

fn default_artifact_url() -> String {
    DEFAULT_ARTIFACT_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_compressed_path() -> PathBuf {
    std::env::temp_dir().join(format!("{DEFAULT_ARTIFACT_NAME}.gz"))
}

fn default_expanded_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_ARTIFACT_NAME)
}

fn default_install_path() -> PathBuf {
    PathBuf::from("/").join(DEFAULT_ARTIFACT_NAME)
}

fn default_poll_interval_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            artifact_url: default_artifact_url(),
            token_url: default_token_url(),
            compressed_path: default_compressed_path(),
            expanded_path: default_expanded_path(),
            install_path: default_install_path(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            compression: Compression::default(),
            hash_algorithm: HashAlgorithm::default(),
            seed_from_installed: false,
        }
    }
}

impl UpdaterConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the invariants the controller relies on.
    ///
    /// # Errors
    /// Returns an error for a zero poll interval or request timeout, or when
    /// two stages would write to the same file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        if self.compressed_path == self.expanded_path {
            return Err(ConfigError::AliasedPaths {
                first: "compressed",
                second: "expanded",
                path: self.compressed_path.clone(),
            });
        }
        if self.compressed_path == self.install_path {
            return Err(ConfigError::AliasedPaths {
                first: "compressed",
                second: "install",
                path: self.compressed_path.clone(),
            });
        }
        if self.expanded_path == self.install_path {
            return Err(ConfigError::AliasedPaths {
                first: "expanded",
                second: "install",
                path: self.expanded_path.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::UpdaterConfig;
    use crate::decompress::Compression;
    use crate::error::ConfigError;
    use crate::inspect::HashAlgorithm;

    #[test]
    fn defaults_poll_daily_and_expect_gzip_md5() {
        let config = UpdaterConfig::default();

        assert_eq!(config.poll_interval(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Md5);
        assert!(!config.seed_from_installed);
        assert_eq!(
            config.compressed_path.with_extension(""),
            config.expanded_path
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let config = UpdaterConfig {
            poll_interval_ms: 0,
            ..UpdaterConfig::default()
        };

        assert_eq!(config.validate(), Err(ConfigError::ZeroPollInterval));
    }

    #[test]
    fn validate_rejects_shared_staging_path() {
        let config = UpdaterConfig {
            expanded_path: "/tmp/same.bin".into(),
            compressed_path: "/tmp/same.bin".into(),
            ..UpdaterConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::AliasedPaths {
                first: "compressed",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_expanding_straight_into_install_path() {
        let config = UpdaterConfig {
            expanded_path: "/srv/geo.mmdb".into(),
            install_path: "/srv/geo.mmdb".into(),
            ..UpdaterConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::AliasedPaths {
                second: "install",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_downloading_over_install_path() {
        let config = UpdaterConfig {
            compressed_path: "/srv/geo.mmdb".into(),
            install_path: "/srv/geo.mmdb".into(),
            ..UpdaterConfig::default()
        };

        assert_eq!(
            config.validate(),
            Err(ConfigError::AliasedPaths {
                first: "compressed",
                second: "install",
                path: "/srv/geo.mmdb".into(),
            })
        );
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_keys() {
        let config: UpdaterConfig = serde_json::from_str(
            r#"{ "poll_interval_ms": 60000, "hash_algorithm": "sha256", "compression": "none" }"#,
        )
        .expect("partial settings should deserialize");

        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.compression, Compression::None);
        assert_eq!(config.token_url, UpdaterConfig::default().token_url);
        assert_eq!(config.install_path, UpdaterConfig::default().install_path);
    }
}
