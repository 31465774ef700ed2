//! Environment-backed secret client for local development

use super::{ClientError, SecretClient};

/// Serves secrets from environment variables named `{PREFIX}_{NAME}`
///
/// `NAME` is the secret name taken from the resource name (the segment after
/// `/secrets/` for Azure and Google paths), uppercased, with every
/// non-alphanumeric character replaced by `_`. With prefix `SECRET`, the
/// secret `my-app/secrets` is read from `SECRET_MY_APP_SECRETS`.
#[derive(Debug, Clone)]
pub struct EnvSecretClient {
    prefix: String,
}

impl EnvSecretClient {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for `resource_name`
    pub fn variable_name(&self, resource_name: &str) -> String {
        let name: String = secret_name(resource_name)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();

        if self.prefix.is_empty() {
            name
        } else {
            format!("{}_{}", self.prefix.to_ascii_uppercase(), name)
        }
    }
}

impl Default for EnvSecretClient {
    fn default() -> Self {
        Self::new("SECRET")
    }
}

#[async_trait::async_trait]
impl SecretClient for EnvSecretClient {
    async fn get_secret(&self, name: &str) -> Result<Vec<u8>, ClientError> {
        let var = self.variable_name(name);
        std::env::var(&var)
            .map(String::into_bytes)
            .map_err(|_| ClientError::NotFound(var))
    }
}

fn secret_name(resource_name: &str) -> &str {
    match resource_name.rfind("/secrets/") {
        Some(idx) => {
            let rest = &resource_name[idx + "/secrets/".len()..];
            rest.split('/').next().unwrap_or(rest)
        }
        None => resource_name,
    }
}
