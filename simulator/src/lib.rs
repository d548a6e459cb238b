use axum::{
    extract::{ws::WebSocketUpgrade, Path, State as AxumState},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use gridstake_types::{
    Action, Board, Cell, Identity, Notification, SessionRecord, Submission, BOARD_CELLS,
};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

/// Smallest stake accepted for a new match.
pub const MIN_STAKE: u64 = 100;

/// Execution charged for the house reply search inside a move submission.
/// A submission whose budget does not cover it is rejected wholesale.
pub const HOUSE_SEARCH_COST: u64 = 50_000;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

/// Reason a submission was refused. The text is what clients surface verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Reject {
    #[error("match already active")]
    MatchAlreadyActive,
    #[error("stake {stake} below minimum {min}")]
    StakeBelowMinimum { stake: u64, min: u64 },
    #[error("no active match")]
    NoActiveMatch,
    #[error("not the player's turn")]
    NotPlayersTurn,
    #[error("cell {0} out of range")]
    CellOutOfRange(u8),
    #[error("cell {0} already occupied")]
    CellOccupied(u8),
    #[error("execution budget exceeded")]
    BudgetExceeded,
    #[error("no prize to claim")]
    NoPrizeToClaim,
    #[error("nothing to withdraw")]
    NothingToWithdraw,
    #[error("internal error")]
    Internal,
}

#[derive(Default)]
struct State {
    sessions: HashMap<Identity, SessionRecord>,
    balances: HashMap<Identity, u64>,
}

/// In-memory authoritative ledger: per-identity session records and
/// withdrawable balances, with notifications broadcast on every accepted
/// state change.
#[derive(Clone)]
pub struct Simulator {
    state: Arc<RwLock<State>>,
    notify_tx: broadcast::Sender<Notification>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            notify_tx,
        }
    }

    /// The session record for `identity`, if one was ever created.
    pub fn session(&self, identity: &Identity) -> Option<SessionRecord> {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("failed to acquire read lock in session: {}", e);
                return None;
            }
        };
        state.sessions.get(identity).copied()
    }

    /// The withdrawable balance for `identity` (zero when unknown).
    pub fn balance(&self, identity: &Identity) -> u64 {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("failed to acquire read lock in balance: {}", e);
                return 0;
            }
        };
        state.balances.get(identity).copied().unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    /// Apply a submission atomically: either the whole action takes effect and
    /// its notifications are broadcast, or the state is left untouched.
    pub fn apply(&self, submission: Submission) -> Result<(), Reject> {
        let mut notifications = Vec::new();
        let result = {
            let mut state = self.state.write().map_err(|e| {
                tracing::error!("failed to acquire write lock in apply: {}", e);
                Reject::Internal
            })?;
            let identity = submission.identity;
            match submission.action {
                Action::StartMatch { stake } => Self::start_match(&mut state, identity, stake),
                Action::Move { cell, budget } => {
                    Self::submit_move(&mut state, &mut notifications, identity, cell, budget)
                }
                Action::ClaimPrize => Self::claim_prize(&mut state, identity),
                Action::Withdraw => Self::withdraw(&mut state, identity),
            }
        }; // Release the lock before broadcasting.
        if result.is_ok() {
            for notification in notifications {
                if self.notify_tx.send(notification).is_err() {
                    tracing::debug!("no notification subscribers");
                }
            }
        }
        result
    }

    fn start_match(state: &mut State, identity: Identity, stake: u64) -> Result<(), Reject> {
        let record = state.sessions.get(&identity).copied().unwrap_or_default();
        if record.active {
            return Err(Reject::MatchAlreadyActive);
        }
        if stake < MIN_STAKE {
            return Err(Reject::StakeBelowMinimum {
                stake,
                min: MIN_STAKE,
            });
        }
        // A new match overwrites any settled record, claimed or not.
        state.sessions.insert(
            identity,
            SessionRecord {
                board: Board::default(),
                active: true,
                stake,
                player_turn: true,
                player_won: false,
            },
        );
        Ok(())
    }

    fn submit_move(
        state: &mut State,
        notifications: &mut Vec<Notification>,
        identity: Identity,
        cell: u8,
        budget: u64,
    ) -> Result<(), Reject> {
        let record = state.sessions.get(&identity).copied().unwrap_or_default();
        if !record.active {
            return Err(Reject::NoActiveMatch);
        }
        if !record.player_turn {
            return Err(Reject::NotPlayersTurn);
        }
        let index = usize::from(cell);
        if index >= BOARD_CELLS {
            return Err(Reject::CellOutOfRange(cell));
        }
        if !matches!(record.board.get(index), Some(Cell::Empty)) {
            return Err(Reject::CellOccupied(cell));
        }

        // Work on a copy so a rejected submission leaves the record untouched.
        let mut updated = record;
        let mut pending = Vec::new();
        updated.board.set(index, Cell::Player);
        updated.player_turn = false;
        pending.push(Notification::MoveMade {
            player: identity,
            cell,
        });

        if updated.board.winner() == Some(Cell::Player) {
            updated.active = false;
            updated.player_won = true;
            pending.push(Notification::GameEnded {
                player: identity,
                player_won: true,
            });
        } else if updated.board.is_full() {
            Self::refund_draw(state, identity, &mut updated);
            pending.push(Notification::GameEnded {
                player: identity,
                player_won: false,
            });
        } else {
            if budget < HOUSE_SEARCH_COST {
                return Err(Reject::BudgetExceeded);
            }
            let reply = house_reply(&updated.board).ok_or(Reject::Internal)?;
            updated.board.set(reply, Cell::Opponent);
            pending.push(Notification::MoveMade {
                player: identity,
                cell: reply as u8,
            });
            if updated.board.winner() == Some(Cell::Opponent) {
                updated.active = false;
                updated.player_won = false;
                pending.push(Notification::GameEnded {
                    player: identity,
                    player_won: false,
                });
            } else if updated.board.is_full() {
                Self::refund_draw(state, identity, &mut updated);
                pending.push(Notification::GameEnded {
                    player: identity,
                    player_won: false,
                });
            } else {
                updated.player_turn = true;
            }
        }

        state.sessions.insert(identity, updated);
        notifications.extend(pending);
        Ok(())
    }

    /// Drawn match: the stake goes back to the withdrawable balance and the
    /// record resets, so the session reads back as idle.
    fn refund_draw(state: &mut State, identity: Identity, record: &mut SessionRecord) {
        *state.balances.entry(identity).or_default() += record.stake;
        *record = SessionRecord::default();
    }

    fn claim_prize(state: &mut State, identity: Identity) -> Result<(), Reject> {
        let record = state.sessions.get(&identity).copied().unwrap_or_default();
        if record.active || record.stake == 0 || !record.player_won {
            return Err(Reject::NoPrizeToClaim);
        }
        *state.balances.entry(identity).or_default() += record.stake * 2;
        state.sessions.insert(identity, SessionRecord::default());
        Ok(())
    }

    fn withdraw(state: &mut State, identity: Identity) -> Result<(), Reject> {
        match state.balances.get_mut(&identity) {
            Some(balance) if *balance > 0 => {
                *balance = 0;
                Ok(())
            }
            _ => Err(Reject::NothingToWithdraw),
        }
    }
}

/// House move policy: take a winning cell when one exists, otherwise the
/// first empty cell in row-major order. Deterministic so tests can assert
/// exact trajectories.
fn house_reply(board: &Board) -> Option<usize> {
    for index in board.empty_cells() {
        let mut candidate = *board;
        candidate.set(index, Cell::Opponent);
        if candidate.winner() == Some(Cell::Opponent) {
            return Some(index);
        }
    }
    board.empty_cells().next()
}

pub struct Api {
    simulator: Arc<Simulator>,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        Self { simulator }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        Router::new()
            .route("/submit", post(submit))
            .route("/session/:identity", get(query_session))
            .route("/balance/:identity", get(query_balance))
            .route("/updates/:identity", get(updates_ws))
            .layer(cors)
            .with_state(self.simulator.clone())
    }
}

async fn submit(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(submission): Json<Submission>,
) -> impl IntoResponse {
    match simulator.apply(submission) {
        Ok(()) => (StatusCode::OK, String::new()),
        Err(reject) => (StatusCode::BAD_REQUEST, reject.to_string()),
    }
}

async fn query_session(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(identity): Path<String>,
) -> impl IntoResponse {
    let identity: Identity = match identity.parse() {
        Ok(identity) => identity,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match simulator.session(&identity) {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn query_balance(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(identity): Path<String>,
) -> impl IntoResponse {
    let identity: Identity = match identity.parse() {
        Ok(identity) => identity,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    (StatusCode::OK, Json(simulator.balance(&identity))).into_response()
}

async fn updates_ws(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(identity): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_updates_ws(socket, simulator, identity))
}

async fn handle_updates_ws(
    socket: axum::extract::ws::WebSocket,
    simulator: Arc<Simulator>,
    identity: String,
) {
    tracing::info!("updates WebSocket connected, identity: {}", identity);
    let (mut sender, mut receiver) = socket.split();

    let identity: Identity = match identity.parse() {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("failed to parse identity: {}", e);
            let _ = sender.close().await;
            return;
        }
    };
    let mut notifications = simulator.subscribe();

    loop {
        tokio::select! {
            // Handle incoming WebSocket messages (ping/pong/close)
            msg = receiver.next() => {
                match msg {
                    Some(Ok(axum::extract::ws::Message::Close(_))) => {
                        tracing::info!("client closed WebSocket connection");
                        break;
                    }
                    Some(Ok(axum::extract::ws::Message::Ping(data))) => {
                        if sender.send(axum::extract::ws::Message::Pong(data)).await.is_err() {
                            tracing::warn!("failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {:?}", e);
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break;
                    }
                    _ => {} // Ignore other message types
                }
            }
            // Forward notifications addressed to this identity
            notification = notifications.recv() => {
                match notification {
                    Ok(notification) => {
                        if notification.player() != &identity {
                            continue;
                        }
                        let text = match serde_json::to_string(&notification) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!("failed to encode notification: {}", e);
                                continue;
                            }
                        };
                        if sender
                            .send(axum::extract::ws::Message::Text(text))
                            .await
                            .is_err()
                        {
                            tracing::warn!("failed to send notification, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "WebSocket client lagged behind, skipped {} notifications",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("notification channel closed");
                        break;
                    }
                }
            }
        }
    }
    tracing::info!("updates WebSocket handler exiting");
    let _ = sender.close().await;
}
