//! Deployment profiles
//!
//! A [`Profile`] selects which sources apply to a resolution. Resolutions take
//! the profile as an explicit argument; the process-wide default below only
//! serves the outermost call site (`SettingsResolver::resolve_current`), which
//! captures it once when the call starts.

use crate::sources::SourceSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable naming the active profile
pub const PROFILE_ENV_VAR: &str = "ENVIRONMENT";

/// Deployment profile
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Profile {
    #[default]
    Development,
    Production,
    Testing,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
            Profile::Testing => "testing",
        }
    }

    pub fn all() -> [Profile; 3] {
        [Profile::Development, Profile::Production, Profile::Testing]
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown profile `{0}` (expected development, production or testing)")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "production" | "prod" => Ok(Profile::Production),
            "testing" | "test" => Ok(Profile::Testing),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}

impl TryFrom<String> for Profile {
    type Error = UnknownProfile;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Profile> for String {
    fn from(profile: Profile) -> Self {
        profile.as_str().to_string()
    }
}

static CURRENT: RwLock<Profile> = RwLock::new(Profile::Development);

/// The process-wide default profile (Development if never set)
pub fn current() -> Profile {
    *CURRENT.read().unwrap_or_else(|e| e.into_inner())
}

/// Set the process-wide default for subsequent resolutions
pub fn set(profile: Profile) {
    let mut guard = CURRENT.write().unwrap_or_else(|e| e.into_inner());
    *guard = profile;
}

/// Set the default from `ENVIRONMENT`
///
/// An unset variable selects Development. An unrecognized value is rejected
/// and leaves the default unchanged.
pub fn init_from_env() -> Result<Profile, UnknownProfile> {
    let profile = match std::env::var(PROFILE_ENV_VAR) {
        Ok(value) => value.parse().map_err(|e: UnknownProfile| {
            warn!(value = %value, "Ignoring unknown profile in {}", PROFILE_ENV_VAR);
            e
        })?,
        Err(_) => Profile::default(),
    };

    set(profile);
    debug!(profile = %profile, "Active profile initialized from environment");
    Ok(profile)
}

/// Restores the previous default profile when dropped
#[must_use = "the previous profile is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ProfileGuard {
    previous: Profile,
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        set(self.previous);
    }
}

/// Switch the default profile until the returned guard is dropped
pub fn override_current(profile: Profile) -> ProfileGuard {
    let mut guard = CURRENT.write().unwrap_or_else(|e| e.into_inner());
    let previous = *guard;
    *guard = profile;
    ProfileGuard { previous }
}

/// Sources that apply to `profile`, in ascending rank
pub fn applicable_sources(specs: &[SourceSpec], profile: Profile) -> Vec<&SourceSpec> {
    let mut applicable: Vec<&SourceSpec> = specs.iter().filter(|s| s.applies_to(profile)).collect();
    applicable.sort_by_key(|s| s.rank());
    applicable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;
    use serial_test::serial;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("dev".parse::<Profile>().unwrap(), Profile::Development);
        assert_eq!("Development".parse::<Profile>().unwrap(), Profile::Development);
        assert_eq!("PROD".parse::<Profile>().unwrap(), Profile::Production);
        assert_eq!("production".parse::<Profile>().unwrap(), Profile::Production);
        assert_eq!("test".parse::<Profile>().unwrap(), Profile::Testing);
        assert_eq!(" Testing ".parse::<Profile>().unwrap(), Profile::Testing);
        assert!("staging".parse::<Profile>().is_err());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(Profile::Production.to_string(), "production");
        assert_eq!(serde_json::to_string(&Profile::Testing).unwrap(), "\"testing\"");
        assert_eq!(
            serde_json::from_str::<Profile>("\"prod\"").unwrap(),
            Profile::Production
        );
        assert!(serde_json::from_str::<Profile>("\"staging\"").is_err());
    }

    #[test]
    #[serial]
    fn test_set_and_current() {
        set(Profile::Production);
        assert_eq!(current(), Profile::Production);
        set(Profile::Development);
        assert_eq!(current(), Profile::Development);
    }

    #[test]
    #[serial]
    fn test_override_guard_restores() {
        set(Profile::Development);
        {
            let _guard = override_current(Profile::Testing);
            assert_eq!(current(), Profile::Testing);
        }
        assert_eq!(current(), Profile::Development);
    }

    #[test]
    #[serial]
    fn test_init_from_env() {
        set(Profile::Development);

        std::env::set_var(PROFILE_ENV_VAR, "prod");
        assert_eq!(init_from_env().unwrap(), Profile::Production);
        assert_eq!(current(), Profile::Production);

        std::env::set_var(PROFILE_ENV_VAR, "staging");
        assert!(init_from_env().is_err());
        assert_eq!(current(), Profile::Production);

        std::env::remove_var(PROFILE_ENV_VAR);
        assert_eq!(init_from_env().unwrap(), Profile::Development);
    }

    #[test]
    fn test_applicable_sources() {
        let specs = vec![
            SourceSpec::new("secrets", SourceKind::EncryptedFile, ".env.encrypted", 50),
            SourceSpec::new("dotenv", SourceKind::PlainFile, ".env", 10),
            SourceSpec::new("prod", SourceKind::Yaml, "prod.yaml", 30)
                .with_profiles([Profile::Production]),
            SourceSpec::new("test", SourceKind::Yaml, "test.yaml", 20)
                .with_profiles([Profile::Testing, Profile::Development]),
        ];

        let ids = |profile| {
            applicable_sources(&specs, profile)
                .iter()
                .map(|s| s.source_id().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(ids(Profile::Production), vec!["dotenv", "prod", "secrets"]);
        assert_eq!(ids(Profile::Development), vec!["dotenv", "test", "secrets"]);
        assert_eq!(ids(Profile::Testing), vec!["dotenv", "test", "secrets"]);
    }
}
