use crate::config::HubConfig;
use crate::hub::Hub;
use crate::store::MembershipStore;
use std::sync::Arc;

/// Shared application state handed to every axum handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    /// Same store the hub resolves rooms against
    pub store: MembershipStore,
    pub config: Arc<HubConfig>,
}

impl AppState {
    pub async fn new(config: HubConfig) -> Self {
        let store = MembershipStore::new();
        let hub = Arc::new(Hub::new(&config, store.clone()).await);
        Self {
            hub,
            store,
            config: Arc::new(config),
        }
    }
}
