//! Assembles a [`Syncer`] and its collaborators from a validated
//! [`CoreConfig`].

use std::sync::Arc;

use core_auth::{CredentialStore, SessionManager};
use core_library::db::{self, DatabaseConfig};
use core_library::LibraryStore;
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use provider_ampache::AmpacheClient;
use tracing::info;

use crate::config::SyncConfig;
use crate::observer::SyncObserver;
use crate::repository::SqliteSyncWaveRepository;
use crate::syncer::Syncer;
use crate::Result;

/// Everything a host holds on to while the engine runs
pub struct SyncRuntime {
    pub syncer: Syncer,
    pub session: Arc<SessionManager>,
    pub event_bus: EventBus,
}

impl SyncRuntime {
    /// Open the wave database and wire the client, session and syncer
    ///
    /// Feature flags in `core` win over the matching `sync` settings.
    /// Credentials saved by an earlier run are not replayed here; call
    /// [`SessionManager::restore_credentials`] and `authenticate` for that.
    ///
    /// # Errors
    ///
    /// Fails when `core` does not validate or the database cannot be opened.
    pub async fn start(
        core: &CoreConfig,
        library: Arc<dyn LibraryStore>,
        mut sync: SyncConfig,
    ) -> Result<Self> {
        core.validate()?;

        let pool = db::connect(DatabaseConfig::file(&core.database_path)).await?;
        let event_bus = EventBus::new(core.event_buffer_size);
        let client = AmpacheClient::new(Arc::clone(&core.http_client), core.server_url.clone());

        let mut session = SessionManager::new(Arc::new(client.clone()), event_bus.clone());
        if let Some(store) = &core.secure_store {
            session = session.with_credential_store(CredentialStore::new(Arc::clone(store)));
        }
        let session = Arc::new(session);

        sync.enable_podcasts = core.features.enable_podcasts;
        let mut syncer = Syncer::new(
            client,
            Arc::clone(&session),
            library,
            Arc::new(SqliteSyncWaveRepository::new(pool)),
            SyncObserver::new(event_bus.clone()),
            sync,
        );
        if core.features.enable_network_awareness {
            if let Some(monitor) = &core.network_monitor {
                syncer = syncer.with_network_monitor(Arc::clone(monitor));
            }
        }

        info!(server = %core.server_url, "Sync runtime ready");
        Ok(Self {
            syncer,
            session,
            event_bus,
        })
    }
}
