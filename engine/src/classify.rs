use gridstake_types::SessionRecord;

/// Whose move it is within an active match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    Player,
    Opponent,
}

/// Lifecycle phase derived from a session record.
///
/// Exactly one phase is derivable from any record. The settled phases are
/// UI-terminal but not session-terminal: a new match overwrites the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No match in progress and nothing staked: a new match is startable.
    Idle,
    /// Match in progress.
    Active(Turn),
    /// Match settled in the player's favor; the prize is claimable.
    SettledWon,
    /// Match settled against the player; the stake is forfeit.
    SettledLost,
}

impl Phase {
    pub fn is_player_turn(&self) -> bool {
        matches!(self, Phase::Active(Turn::Player))
    }

    pub fn claim_available(&self) -> bool {
        matches!(self, Phase::SettledWon)
    }

    /// Whether a new match may be started locally. Deliberately excludes
    /// `SettledWon`: a stale click must not overwrite an unclaimed prize.
    pub fn startable(&self) -> bool {
        matches!(self, Phase::Idle | Phase::SettledLost)
    }
}

/// Derive the lifecycle phase from a session record.
///
/// Pure and total over every record. It reads the data as-is and never infers
/// intent: a record that settled the instant after a move submission
/// classifies as settled, whatever the local flow expected.
pub fn classify(record: &SessionRecord) -> Phase {
    if record.active {
        if record.player_turn {
            Phase::Active(Turn::Player)
        } else {
            Phase::Active(Turn::Opponent)
        }
    } else if record.stake > 0 {
        if record.player_won {
            Phase::SettledWon
        } else {
            Phase::SettledLost
        }
    } else {
        Phase::Idle
    }
}
