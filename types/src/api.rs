use crate::Identity;
use serde::{Deserialize, Serialize};

/// A state-changing request accepted by the ledger's submit endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Open a new match, wagering `stake`.
    StartMatch { stake: u64 },
    /// Place the player's mark at `cell`. The house replies within the same
    /// submission, so `budget` must cover its move search as well.
    Move { cell: u8, budget: u64 },
    /// Collect the payout of a settled, won match.
    ClaimPrize,
    /// Drain the accumulated non-game balance.
    Withdraw,
}

/// Envelope for the submit endpoint: which identity the action is for.
///
/// Signing happens at the wallet boundary before the submission is built;
/// the ledger here trusts the envelope as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub identity: Identity,
    pub action: Action,
}

/// Event delivered on the notification channel, addressed to the identity
/// whose session changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    MoveMade { player: Identity, cell: u8 },
    GameEnded { player: Identity, player_won: bool },
}

impl Notification {
    /// The identity this notification is addressed to.
    pub fn player(&self) -> &Identity {
        match self {
            Notification::MoveMade { player, .. } => player,
            Notification::GameEnded { player, .. } => player,
        }
    }
}
