use crate::{
    classify::{classify, Phase},
    ledger::Ledger,
    project::{project, BoardView},
    Result,
};
use gridstake_client::Result as ClientResult;
use gridstake_types::{Identity, Notification, SessionRecord, BOARD_CELLS};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Execution allowance forwarded with every move submission. The house reply
/// is computed within the same submission, so the allowance must leave it
/// headroom; the ledger refuses a submission it cannot finish.
pub const DEFAULT_MOVE_BUDGET: u64 = 1_000_000;

/// Snapshot handed to render targets: the last-fetched record with its
/// derived phase and projected board. Replaced wholesale on every refresh;
/// render targets never observe a partial update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionView {
    pub record: SessionRecord,
    pub phase: Phase,
    pub board: BoardView,
}

impl SessionView {
    fn from_record(record: SessionRecord) -> Self {
        let phase = classify(&record);
        let board = project(&record, phase);
        Self {
            record,
            phase,
            board,
        }
    }

    pub fn claim_available(&self) -> bool {
        self.phase.claim_available()
    }
}

impl Default for SessionView {
    fn default() -> Self {
        Self::from_record(SessionRecord::default())
    }
}

/// Duplicate-submission guards, one per action kind. Local and transient:
/// set when a submission is issued, cleared only by its confirmation, never
/// part of the published view.
#[derive(Default)]
struct Inflight {
    start: bool,
    moves: bool,
    claim: bool,
    withdraw: bool,
}

struct EngineState {
    view: SessionView,
    inflight: Inflight,
    /// Generation handed to the most recently issued fetch.
    issued: u64,
    /// Generation of the fetch whose result is currently installed.
    installed: u64,
}

/// The session reconciliation engine: single writer of the local session
/// view, driven by submissions and notifications, always resynchronizing
/// from the authoritative ledger.
///
/// Cloning yields another handle onto the same session state.
pub struct SessionEngine<L: Ledger> {
    ledger: Arc<L>,
    identity: Identity,
    move_budget: u64,
    state: Arc<Mutex<EngineState>>,
    views: Arc<watch::Sender<SessionView>>,
}

impl<L: Ledger> Clone for SessionEngine<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            identity: self.identity,
            move_budget: self.move_budget,
            state: self.state.clone(),
            views: self.views.clone(),
        }
    }
}

impl<L: Ledger> SessionEngine<L> {
    pub fn new(ledger: L, identity: Identity) -> Self {
        let (views, _) = watch::channel(SessionView::default());
        Self {
            ledger: Arc::new(ledger),
            identity,
            move_budget: DEFAULT_MOVE_BUDGET,
            state: Arc::new(Mutex::new(EngineState {
                view: SessionView::default(),
                inflight: Inflight::default(),
                issued: 0,
                installed: 0,
            })),
            views: Arc::new(views),
        }
    }

    /// Create the engine and perform the initial refresh.
    pub async fn connect(ledger: L, identity: Identity) -> Result<Self> {
        let engine = Self::new(ledger, identity);
        engine.refresh().await?;
        Ok(engine)
    }

    /// Returns a new engine with the provided move execution budget.
    pub fn with_move_budget(mut self, budget: u64) -> Self {
        self.move_budget = budget;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The currently displayed view.
    pub fn view(&self) -> SessionView {
        self.lock().view
    }

    /// Subscribe to view replacements. Render targets read the latest view
    /// from the receiver; intermediate views may be skipped, partial ones
    /// never observed.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.views.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // The lock is never held across an await, so a poisoned guard can
        // only mean a panic mid-update in another thread; the state itself
        // is still a fully written view.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Re-fetch the authoritative record and replace the displayed view.
    ///
    /// Safe to call repeatedly and concurrently. Every invocation takes a
    /// fetch generation at issuance; a completed fetch installs only if no
    /// later-issued fetch has installed before it, so a stale response can
    /// never revert the displayed state (last-issued-wins, not
    /// last-completed-wins). A failed fetch leaves the previous view in
    /// place, stale but consistent.
    pub async fn refresh(&self) -> Result<()> {
        let generation = {
            let mut state = self.lock();
            state.issued += 1;
            state.issued
        };

        match self.ledger.session().await {
            Ok(record) => {
                let view = SessionView::from_record(record.unwrap_or_default());
                let mut state = self.lock();
                if generation <= state.installed {
                    debug!(
                        generation,
                        installed = state.installed,
                        "dropping stale refresh response"
                    );
                    return Ok(());
                }
                state.installed = generation;
                state.view = view;
                // Published under the same lock so receivers observe
                // installations in generation order. send_replace stores the
                // value even while no render target is subscribed yet.
                self.views.send_replace(view);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "refresh failed, keeping last-known view");
                Err(err.into())
            }
        }
    }

    /// Validate and submit the player's move at `cell`.
    ///
    /// Precondition failures (out-of-range cell, non-interactive target, a
    /// move already in flight) are stale-UI artifacts, not user mistakes:
    /// the call is a silent no-op and nothing reaches the ledger. A passing
    /// precondition issues exactly one ledger write; once it confirms —
    /// successfully or not — the in-flight guard is cleared and one refresh
    /// issued, so the displayed state is never the optimistic pre-submission
    /// record.
    pub async fn submit_move(&self, cell: usize) -> Result<()> {
        {
            let mut state = self.lock();
            if cell >= BOARD_CELLS {
                debug!(cell, "ignoring move: cell out of range");
                return Ok(());
            }
            if !state.view.board.interactive(cell) {
                debug!(cell, phase = ?state.view.phase, "ignoring move: cell not interactive");
                return Ok(());
            }
            if state.inflight.moves {
                debug!(cell, "ignoring move: submission already in flight");
                return Ok(());
            }
            state.inflight.moves = true;
        }

        let result = self.ledger.submit_move(cell as u8, self.move_budget).await;
        self.lock().inflight.moves = false;
        self.finish_submission("move", result).await
    }

    /// Open a new match wagering `stake`.
    ///
    /// Startable only from an idle or settled-lost session; a stale click
    /// over an unclaimed win is ignored rather than forfeiting the prize.
    pub async fn start_match(&self, stake: u64) -> Result<()> {
        {
            let mut state = self.lock();
            if stake == 0 {
                debug!("ignoring start: zero stake");
                return Ok(());
            }
            if !state.view.phase.startable() {
                debug!(phase = ?state.view.phase, "ignoring start: not startable");
                return Ok(());
            }
            if state.inflight.start {
                debug!("ignoring start: submission already in flight");
                return Ok(());
            }
            state.inflight.start = true;
        }

        let result = self.ledger.start_match(stake).await;
        self.lock().inflight.start = false;
        self.finish_submission("start", result).await
    }

    /// Collect the payout of a settled, won match. A silent no-op in any
    /// other phase.
    pub async fn claim_prize(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if !state.view.phase.claim_available() {
                debug!(phase = ?state.view.phase, "ignoring claim: no prize available");
                return Ok(());
            }
            if state.inflight.claim {
                debug!("ignoring claim: submission already in flight");
                return Ok(());
            }
            state.inflight.claim = true;
        }

        let result = self.ledger.claim_prize().await;
        self.lock().inflight.claim = false;
        self.finish_submission("claim", result).await
    }

    /// Drain the accumulated non-game balance. Independent of the match
    /// phase; availability is the ledger's call.
    pub async fn withdraw(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.inflight.withdraw {
                debug!("ignoring withdraw: submission already in flight");
                return Ok(());
            }
            state.inflight.withdraw = true;
        }

        let result = self.ledger.withdraw().await;
        self.lock().inflight.withdraw = false;
        self.finish_submission("withdraw", result).await
    }

    /// Resynchronize after a confirmed submission, whatever its outcome.
    /// The confirmation result is what the caller sees unless the refresh
    /// alone failed.
    async fn finish_submission(&self, kind: &str, result: ClientResult<()>) -> Result<()> {
        let refreshed = self.refresh().await;
        match result {
            Ok(()) => {
                debug!(kind, "submission confirmed");
                refreshed
            }
            Err(err) => {
                warn!(kind, error = %err, "submission refused");
                Err(err.into())
            }
        }
    }

    /// React to a ledger notification: refresh when it is addressed to the
    /// connected identity, discard otherwise.
    pub async fn handle_notification(&self, notification: &Notification) -> Result<()> {
        if notification.player() != &self.identity {
            debug!("discarding notification addressed to another identity");
            return Ok(());
        }
        self.refresh().await
    }

    /// Drive a notification stream into the engine until it ends. Stream
    /// errors are logged and skipped; a failed refresh keeps the previous
    /// view and the loop running.
    pub async fn run_notifications(&self, mut stream: gridstake_client::Stream) {
        while let Some(notification) = stream.next().await {
            match notification {
                Ok(notification) => {
                    if let Err(err) = self.handle_notification(&notification).await {
                        warn!(error = %err, "refresh after notification failed");
                    }
                }
                Err(gridstake_client::Error::ConnectionClosed) => {
                    debug!("notification stream closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "notification stream error");
                }
            }
        }
    }
}
