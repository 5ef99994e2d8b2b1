//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::attach::MultipathPolicy;

/// Driver configuration derived from configuration files, environment
/// variables, and defaults.
///
/// The four `store_*` credential options form a static override: when all of
/// them are set the driver authenticates with them instead of the caller's
/// token and service catalog. Setting only some of them is a configuration
/// error surfaced at `configure()` time.
#[derive(Clone, Debug, Default, Deserialize, Eq, OrthoConfig, PartialEq)]
#[ortho_config(prefix = "CINDER")]
pub struct CinderStoreConfig {
    /// User name for the static credential override.
    pub store_user_name: Option<String>,
    /// Password for the static credential override.
    pub store_password: Option<String>,
    /// Project name scoping the static credential override.
    pub store_project_name: Option<String>,
    /// Identity endpoint the static credentials authenticate against.
    pub store_auth_address: Option<String>,
    /// Pins client construction to one region when the catalog or identity
    /// service publishes endpoints for several.
    pub os_region_name: Option<String>,
    /// Attach volumes through multipath when the host supports it.
    #[ortho_config(default = false)]
    pub use_multipath: bool,
    /// Fail attachment instead of falling back to a single path when no
    /// multipath device is available. Only meaningful together with
    /// `use_multipath`.
    #[ortho_config(default = false)]
    pub enforce_multipath: bool,
    /// Volume type requested for new volumes. Validated at configure time;
    /// an unknown type is logged and treated as unset.
    pub volume_type: Option<String>,
    /// Base directory handed to the attach utility for volumes that expose
    /// a filesystem mount instead of a raw block device.
    pub mount_point_base: Option<String>,
}

fn is_set(value: Option<&String>) -> bool {
    value.is_some_and(|text| !text.trim().is_empty())
}

impl CinderStoreConfig {
    /// Loads configuration using the `ortho-config` derive, merging
    /// defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cinder-store")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns true when the full static credential override is configured.
    #[must_use]
    pub fn has_static_credentials(&self) -> bool {
        is_set(self.store_user_name.as_ref())
            && is_set(self.store_password.as_ref())
            && is_set(self.store_project_name.as_ref())
            && is_set(self.store_auth_address.as_ref())
    }

    /// Performs semantic validation of the credential options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PartialCredentials`] when some but not all of
    /// the static credential options are set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("store_user_name", self.store_user_name.as_ref()),
            ("store_password", self.store_password.as_ref()),
            ("store_project_name", self.store_project_name.as_ref()),
            ("store_auth_address", self.store_auth_address.as_ref()),
        ];
        let set_count = fields.iter().filter(|(_, value)| is_set(*value)).count();
        if set_count == 0 || set_count == fields.len() {
            return Ok(());
        }

        let missing = fields
            .iter()
            .filter(|(_, value)| !is_set(*value))
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::PartialCredentials { missing })
    }

    /// Derives the attachment path strategy from the multipath options.
    #[must_use]
    pub const fn multipath_policy(&self) -> MultipathPolicy {
        if !self.use_multipath {
            MultipathPolicy::Disabled
        } else if self.enforce_multipath {
            MultipathPolicy::Enforced
        } else {
            MultipathPolicy::Enabled
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates an incomplete static credential override.
    #[error(
        "static cinder credentials are partially configured; also set {missing} \
         or unset the other cinder_store_* options"
    )]
    PartialCredentials {
        /// Names of the options that are still unset.
        missing: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn static_credentials() -> CinderStoreConfig {
        CinderStoreConfig {
            store_user_name: Some(String::from("test_user")),
            store_password: Some(String::from("test_password")),
            store_project_name: Some(String::from("test_project")),
            store_auth_address: Some(String::from("http://identity.test")),
            ..CinderStoreConfig::default()
        }
    }

    #[test]
    fn full_static_credentials_validate() {
        let config = static_credentials();
        assert!(config.has_static_credentials());
        config.validate().expect("full override should validate");
    }

    #[test]
    fn absent_static_credentials_validate() {
        let config = CinderStoreConfig::default();
        assert!(!config.has_static_credentials());
        config
            .validate()
            .expect("token-based setup should validate");
    }

    #[rstest]
    #[case::missing_password(CinderStoreConfig { store_password: None, ..static_credentials() })]
    #[case::blank_address(
        CinderStoreConfig { store_auth_address: Some(String::from("  ")), ..static_credentials() }
    )]
    fn partial_static_credentials_are_rejected(#[case] config: CinderStoreConfig) {
        assert!(!config.has_static_credentials());
        let err = config.validate().expect_err("partial override should fail");
        assert!(matches!(err, ConfigError::PartialCredentials { .. }));
    }

    #[rstest]
    #[case(false, false, MultipathPolicy::Disabled)]
    #[case(false, true, MultipathPolicy::Disabled)]
    #[case(true, false, MultipathPolicy::Enabled)]
    #[case(true, true, MultipathPolicy::Enforced)]
    fn multipath_policy_follows_the_option_pair(
        #[case] use_multipath: bool,
        #[case] enforce_multipath: bool,
        #[case] expected: MultipathPolicy,
    ) {
        let config = CinderStoreConfig {
            use_multipath,
            enforce_multipath,
            ..CinderStoreConfig::default()
        };
        assert_eq!(config.multipath_policy(), expected);
    }
}
