use async_trait::async_trait;
use gridstake_client::{Client, Result as ClientResult};
use gridstake_types::SessionRecord;

/// The authoritative ledger boundary, bound to one connected identity.
///
/// Reads are side-effect free. Writes resolve when the ledger confirms or
/// refuses the submission; the engine applies no timeout or retry of its own,
/// so a never-resolving future keeps the corresponding in-flight guard set
/// until the calling flow gives up externally.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// The session record for the connected identity, `None` when the ledger
    /// has no record yet.
    async fn session(&self) -> ClientResult<Option<SessionRecord>>;

    async fn start_match(&self, stake: u64) -> ClientResult<()>;

    async fn submit_move(&self, cell: u8, budget: u64) -> ClientResult<()>;

    async fn claim_prize(&self) -> ClientResult<()>;

    async fn withdraw(&self) -> ClientResult<()>;
}

#[async_trait]
impl Ledger for Client {
    async fn session(&self) -> ClientResult<Option<SessionRecord>> {
        Client::session(self).await
    }

    async fn start_match(&self, stake: u64) -> ClientResult<()> {
        Client::start_match(self, stake).await
    }

    async fn submit_move(&self, cell: u8, budget: u64) -> ClientResult<()> {
        Client::submit_move(self, cell, budget).await
    }

    async fn claim_prize(&self) -> ClientResult<()> {
        Client::claim_prize(self).await
    }

    async fn withdraw(&self) -> ClientResult<()> {
        Client::withdraw(self).await
    }
}
