//! API key resolution for providers.

use crate::error::LLMError;

/// Resolves the credential a provider should use to authenticate requests.
pub trait ApiKeyResolver: Send + Sync {
    fn resolve(&self) -> Result<String, LLMError>;
}

/// Resolves a key that was supplied directly (config file, CLI flag).
pub struct StaticKeyResolver(String);

impl StaticKeyResolver {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl ApiKeyResolver for StaticKeyResolver {
    fn resolve(&self) -> Result<String, LLMError> {
        Ok(self.0.clone())
    }
}

/// Resolves a key from an environment variable, read at call time so a
/// key rotated at runtime is picked up without restarting the process.
pub struct EnvKeyResolver {
    var_name: String,
}

impl EnvKeyResolver {
    pub fn new(var_name: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
        }
    }
}

impl ApiKeyResolver for EnvKeyResolver {
    fn resolve(&self) -> Result<String, LLMError> {
        std::env::var(&self.var_name)
            .map_err(|_| LLMError::AuthError(format!("{} is not set", self.var_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resolver_returns_its_key() {
        let r = StaticKeyResolver::new("sk-test");
        assert_eq!(r.resolve().unwrap(), "sk-test");
    }

    #[test]
    fn env_resolver_errors_when_unset() {
        let r = EnvKeyResolver::new("DOCWIZ_TEST_KEY_DOES_NOT_EXIST");
        assert!(r.resolve().is_err());
    }
}
