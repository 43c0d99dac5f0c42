use anyhow::Context;
use flowbox_config::{AppConfig, ConfigManager};
use flowbox_core::Identity;
use flowbox_remote::{
    ApiClient, ChannelTransport, EnvIdentity, HttpStore, RelayTransport, SmtpTransport,
};
use flowbox_stream::{Collaborators, IdentityProvider, InboxEngine, Transport};
use std::sync::Arc;

pub struct DaemonState {
    pub config: AppConfig,
    pub identity: Identity,
    pub engine: InboxEngine,
}

impl DaemonState {
    pub fn initialize() -> anyhow::Result<Self> {
        let config_manager = ConfigManager::new().context("initialize config manager")?;
        let config = config_manager.load().context("load app config")?;
        tracing::info!(
            path = %config_manager.config_path().display(),
            profile = %config.profile_name,
            "config loaded"
        );

        let identity = EnvIdentity::from_config(&config.identity)
            .context("resolve signed-in user")?
            .current();

        let client = ApiClient::from_config(&config.remote).context("build api client")?;
        let store = Arc::new(HttpStore::new(client.clone()));
        let collaborators = Collaborators {
            conversations: store.clone(),
            comments: store.clone(),
            connections: store,
            transport: Arc::new(transport(&config, client)?),
        };
        let engine = InboxEngine::new(collaborators, &config);

        Ok(Self {
            config,
            identity,
            engine,
        })
    }
}

fn transport(config: &AppConfig, client: ApiClient) -> anyhow::Result<ChannelTransport> {
    let email: Option<Arc<dyn Transport>> = if config.smtp.enabled {
        let smtp = SmtpTransport::from_config(&config.smtp).context("build smtp transport")?;
        Some(Arc::new(smtp))
    } else {
        tracing::warn!("smtp disabled, email replies will be refused");
        None
    };
    Ok(ChannelTransport::new(email, Arc::new(RelayTransport::new(client))))
}
