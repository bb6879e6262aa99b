use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::{Settings, Updateable};

/// Cluster-membership view published to the rest of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodesConfig {
    pub version: u64,
    /// Node index to address.
    pub nodes: BTreeMap<u32, String>,
}

/// Reconciles the two sources of nodes configuration.
///
/// The legacy view is derived from the server config; the newer one comes
/// from the configuration manager. A settings pair selects which source is
/// authoritative; every notification re-evaluates the choice and installs
/// the chosen view when it differs by identity from the published one.
pub struct NodesConfigPublisher {
    settings: Arc<Updateable<Settings>>,
    server_config_source: Arc<Updateable<NodesConfig>>,
    manager_source: Arc<Updateable<NodesConfig>>,
    published: Arc<Updateable<NodesConfig>>,
    // Subscription callbacks can fire on distinct threads; publishing is
    // serialized.
    publish_lock: Mutex<()>,
}

impl NodesConfigPublisher {
    /// Creates the publisher and performs the initial publish. With
    /// `subscribe` set, future changes to the settings or either source
    /// re-trigger publishing.
    pub fn new(
        settings: Arc<Updateable<Settings>>,
        server_config_source: Arc<Updateable<NodesConfig>>,
        manager_source: Arc<Updateable<NodesConfig>>,
        published: Arc<Updateable<NodesConfig>>,
        subscribe: bool,
    ) -> Arc<Self> {
        let publisher = Arc::new(Self {
            settings,
            server_config_source,
            manager_source,
            published,
            publish_lock: Mutex::new(()),
        });

        if subscribe {
            subscribe_weak(&publisher.settings, &publisher);
            subscribe_weak(&publisher.server_config_source, &publisher);
            subscribe_weak(&publisher.manager_source, &publisher);
        }

        publisher.publish();
        publisher
    }

    /// Re-evaluates the authoritative source and installs its view if it
    /// differs by identity from the currently published one.
    pub fn publish(&self) {
        let _guard = self.publish_lock.lock();

        let settings = self.settings.get();
        let from_manager = settings.enable_nodes_configuration_manager
            && settings.use_nodes_configuration_manager_nodes_configuration;

        let candidate = if from_manager {
            self.manager_source.get()
        } else {
            self.server_config_source.get()
        };

        let current = self.published.get();
        if Arc::ptr_eq(&current, &candidate) {
            return;
        }

        let version = candidate.version;
        let source = if from_manager {
            "nodes_configuration_manager"
        } else {
            "server_config"
        };

        match self.published.update(candidate) {
            Ok(()) => info!(version, source, "published nodes configuration"),
            Err(e) => {
                // The previous view stays authoritative.
                error!(version, source, error = %e, "failed to publish nodes configuration");
            }
        }
    }
}

fn subscribe_weak<T: Send + Sync + 'static>(
    source: &Arc<Updateable<T>>,
    publisher: &Arc<NodesConfigPublisher>,
) {
    let weak: Weak<NodesConfigPublisher> = Arc::downgrade(publisher);
    source.subscribe(move || {
        if let Some(publisher) = weak.upgrade() {
            publisher.publish();
        }
    });
}
