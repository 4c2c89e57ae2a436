use crate::config::GraphConfig;
use crate::error::Result;
use crate::substrate::LocalSubstrate;
use futures::future::try_join_all;
use std::sync::Arc;

use super::Controller;

impl Controller {
    /// Build `world_size` controllers over an in-process [`LocalSubstrate`],
    /// all on one simulated host. Element `i` is rank `i`.
    ///
    /// Controllers are created concurrently because installing
    /// `config.topology` is collective.
    pub async fn bootstrap_local(world_size: u32, config: GraphConfig) -> Result<Vec<Controller>> {
        Self::bootstrap_local_with_hosts(world_size, world_size, config).await
    }

    /// Like [`bootstrap_local`](Self::bootstrap_local), with `ranks_per_host`
    /// ranks per simulated host.
    pub async fn bootstrap_local_with_hosts(
        world_size: u32,
        ranks_per_host: u32,
        config: GraphConfig,
    ) -> Result<Vec<Controller>> {
        let substrates = LocalSubstrate::bootstrap(world_size, ranks_per_host)?;
        try_join_all(
            substrates
                .into_iter()
                .map(|s| Controller::new(Arc::new(s), config.clone())),
        )
        .await
    }
}
