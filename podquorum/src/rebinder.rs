use std::slice;

use crate::{
    engine::ConsensusEngine,
    error::{Error, Result},
    membership_store::MembershipStore,
    node_record::NodeRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebindOutcome {
    /// No membership was persisted yet; the engine bootstraps a new group.
    Fresh,
    /// The node now is the only voter of its group under `current`.
    Rebound {
        previous: Option<NodeRecord>,
        current: NodeRecord,
    },
}

impl RebindOutcome {
    pub fn address_changed(&self) -> bool {
        match self {
            RebindOutcome::Fresh => false,
            RebindOutcome::Rebound { previous, current } => previous
                .as_ref()
                .map_or(true, |previous| previous.address != current.address),
        }
    }
}

/// Re-identifies a node that restarts alone under a new address.
///
/// Every step writes the same content for the same address, so running it
/// again after a crash converges to the same state.
pub struct AddressRebinder<'a, E: ConsensusEngine> {
    store: &'a MembershipStore,
    engine: &'a E,
    logger: slog::Logger,
}

impl<'a, E: ConsensusEngine> AddressRebinder<'a, E> {
    pub fn new(store: &'a MembershipStore, engine: &'a E, logger: slog::Logger) -> Self {
        Self {
            store,
            engine,
            logger,
        }
    }

    pub async fn rebind(&self, new_address: &str) -> Result<RebindOutcome> {
        let previous = self.store.load_self()?;
        if previous.is_none() && self.store.load()?.is_empty() {
            slog::info!(self.logger, "No persisted membership found, starting a new group";
                "data_dir" => %self.store.dir().display());
            return Ok(RebindOutcome::Fresh);
        }

        let current = NodeRecord::voter(new_address);
        match &previous {
            Some(previous) if previous.address == current.address => {
                slog::info!(self.logger, "Node address unchanged, refreshing persisted membership";
                    "id" => current.id, "address" => &current.address);
            }
            _ => {
                slog::info!(self.logger, "Rebinding node to its new address";
                    "previous_id" => previous.as_ref().map(|r| r.id),
                    "previous_address" => previous.as_ref().map(|r| r.address.clone()),
                    "id" => current.id,
                    "address" => &current.address);
            }
        }

        self.store.rewrite_self(current.id, &current.address)?;
        self.store.save(slice::from_ref(&current))?;
        self.engine
            .reconfigure_offline(self.store.dir(), slice::from_ref(&current))
            .await
            .map_err(|err| match err {
                Error::Reconfiguration(_) => err,
                other => Error::Reconfiguration(other.to_string()),
            })?;

        Ok(RebindOutcome::Rebound { previous, current })
    }
}
