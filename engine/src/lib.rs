pub mod classify;
pub mod ledger;
pub mod mocks;
pub mod project;
pub mod session;

pub use classify::{classify, Phase, Turn};
pub use ledger::Ledger;
pub use project::{project, BoardView, CellView};
pub use session::{SessionEngine, SessionView, DEFAULT_MOVE_BUDGET};

use thiserror::Error;

/// Error type for engine operations.
///
/// Local precondition failures are not errors at all (see
/// [`SessionEngine::submit_move`]); everything here crossed the ledger
/// boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// The ledger refused a submission; the reason comes through verbatim.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Transport-level failure at the ledger boundary.
    #[error(transparent)]
    Ledger(gridstake_client::Error),
}

impl From<gridstake_client::Error> for Error {
    fn from(err: gridstake_client::Error) -> Self {
        match err {
            gridstake_client::Error::Rejected(reason) => Error::Rejected(reason),
            other => Error::Ledger(other),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use gridstake_client::Client;
    use gridstake_simulator::{Api, Simulator};
    use gridstake_types::{Cell, Identity};
    use std::{net::SocketAddr, sync::Arc};
    use tokio::time::{sleep, Duration};

    struct TestContext {
        base_url: String,
        server_handle: tokio::task::JoinHandle<()>,
    }

    impl TestContext {
        async fn new() -> Self {
            let simulator = Arc::new(Simulator::new());
            let api = Api::new(simulator);

            // Start server on random port
            let addr = SocketAddr::from(([127, 0, 0, 1], 0));
            let router = api.router();
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let actual_addr = listener.local_addr().unwrap();
            let base_url = format!("http://{actual_addr}");

            let server_handle = tokio::spawn(async move {
                axum::serve(listener, router).await.unwrap();
            });

            // Give server time to start
            sleep(Duration::from_millis(100)).await;

            Self {
                base_url,
                server_handle,
            }
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            self.server_handle.abort();
        }
    }

    #[tokio::test]
    async fn test_full_match_lifecycle() {
        let ctx = TestContext::new().await;
        let identity = Identity::new([1u8; 32]);
        let client = Client::new(&ctx.base_url, identity).unwrap();
        let engine = SessionEngine::connect(client.clone(), identity)
            .await
            .unwrap();
        assert_eq!(engine.view().phase, Phase::Idle);

        engine.start_match(1_000).await.unwrap();
        assert_eq!(engine.view().phase, Phase::Active(Turn::Player));
        assert_eq!(engine.view().board.interactive_cells().count(), 9);

        // 4, 2, 6 beats the win-else-first-empty house.
        engine.submit_move(4).await.unwrap();
        let view = engine.view();
        assert_eq!(view.phase, Phase::Active(Turn::Player));
        assert_eq!(view.board.cells[4].mark, Cell::Player);
        assert_eq!(view.board.cells[0].mark, Cell::Opponent);
        assert!(!view.board.interactive(4));

        engine.submit_move(2).await.unwrap();
        engine.submit_move(6).await.unwrap();

        let view = engine.view();
        assert_eq!(view.phase, Phase::SettledWon);
        assert!(view.claim_available());
        assert_eq!(view.board.interactive_cells().count(), 0);

        engine.claim_prize().await.unwrap();
        assert_eq!(engine.view().phase, Phase::Idle);
        assert_eq!(client.balance().await.unwrap(), 2_000);

        engine.withdraw().await.unwrap();
        assert_eq!(client.balance().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remote_rejection_surfaces_and_resyncs() {
        let ctx = TestContext::new().await;
        let identity = Identity::new([3u8; 32]);
        let client = Client::new(&ctx.base_url, identity).unwrap();
        let engine = SessionEngine::connect(client, identity)
            .await
            .unwrap()
            .with_move_budget(1);

        engine.start_match(1_000).await.unwrap();
        let err = engine.submit_move(4).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected: execution budget exceeded");

        // The post-failure refresh resynchronized: nothing was placed.
        let view = engine.view();
        assert_eq!(view.board.cells[4].mark, Cell::Empty);
        assert_eq!(view.phase, Phase::Active(Turn::Player));
    }

    #[tokio::test]
    async fn test_notifications_drive_refresh() {
        let ctx = TestContext::new().await;
        let identity = Identity::new([2u8; 32]);
        let client = Client::new(&ctx.base_url, identity).unwrap();

        let stream = client.connect_notifications().await.unwrap();
        let engine = SessionEngine::connect(client.clone(), identity)
            .await
            .unwrap();
        let driver = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_notifications(stream).await }
        });
        // Give the server time to register the subscription
        sleep(Duration::from_millis(100)).await;

        // Mutate the session directly through the client; the engine only
        // hears about it through the notification channel.
        client.start_match(500).await.unwrap();
        client.submit_move(4, DEFAULT_MOVE_BUDGET).await.unwrap();

        for _ in 0..100 {
            if engine.view().record.board.get(4) == Some(Cell::Player) {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        let view = engine.view();
        assert_eq!(view.record.board.get(4), Some(Cell::Player));
        assert_eq!(view.record.board.get(0), Some(Cell::Opponent));
        assert_eq!(view.phase, Phase::Active(Turn::Player));

        driver.abort();
    }
}
