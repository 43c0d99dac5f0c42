use crate::error::RemoteError;
use flowbox_config::IdentityConfig;
use flowbox_core::Identity;
use flowbox_stream::IdentityProvider;

/// Signed-in user read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct EnvIdentity {
    identity: Identity,
}

impl EnvIdentity {
    pub fn from_config(config: &IdentityConfig) -> Result<Self, RemoteError> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// The display name falls back to the user id when unset.
    fn resolve(
        config: &IdentityConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RemoteError> {
        let user_id = lookup(&config.user_id_env)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| RemoteError::MissingEnv(config.user_id_env.clone()))?;
        let display_name = lookup(&config.display_name_env)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| user_id.clone());
        Ok(Self {
            identity: Identity::new(user_id, display_name),
        })
    }
}

impl IdentityProvider for EnvIdentity {
    fn current(&self) -> Identity {
        self.identity.clone()
    }
}
