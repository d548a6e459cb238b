pub mod client;
pub mod events;

pub use client::Client;
pub use client::RetryPolicy;
pub use events::Stream;
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("invalid data: {0}")]
    InvalidData(#[from] serde_json::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dial timeout")]
    DialTimeout,
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use gridstake_simulator::{Api, Simulator, HOUSE_SEARCH_COST, MIN_STAKE};
    use gridstake_types::{Action, Cell, Identity, Notification, Submission};
    use std::{net::SocketAddr, sync::Arc};
    use tokio::time::{sleep, Duration};

    const TEST_BUDGET: u64 = 1_000_000;

    struct TestContext {
        simulator: Arc<Simulator>,
        base_url: String,
        server_handle: tokio::task::JoinHandle<()>,
    }

    impl TestContext {
        async fn new() -> Self {
            let simulator = Arc::new(Simulator::new());
            let api = Api::new(simulator.clone());

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
                simulator,
                base_url,
                server_handle,
            }
        }

        fn create_client(&self, seed: u8) -> Client {
            Client::new(&self.base_url, Identity::new([seed; 32])).unwrap()
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            self.server_handle.abort();
        }
    }

    #[tokio::test]
    async fn test_client_session_query() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client(1);

        // Fresh identity has no record yet
        assert!(client.session().await.unwrap().is_none());

        // Create one through the ledger
        ctx.simulator
            .apply(Submission {
                identity: client.identity,
                action: Action::StartMatch { stake: 500 },
            })
            .unwrap();

        let record = client.session().await.unwrap().unwrap();
        assert!(record.active);
        assert!(record.player_turn);
        assert_eq!(record.stake, 500);
    }

    #[tokio::test]
    async fn test_client_submissions() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client(2);

        client.start_match(500).await.unwrap();
        client.submit_move(4, TEST_BUDGET).await.unwrap();

        let record = client.session().await.unwrap().unwrap();
        assert!(record.active);
        assert_eq!(record.board.get(4), Some(Cell::Player));
        // House replied with the first empty cell
        assert_eq!(record.board.get(0), Some(Cell::Opponent));
        assert!(record.player_turn);
    }

    #[tokio::test]
    async fn test_client_rejection_reasons() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client(3);

        // Below the ledger's minimum stake
        let err = client.start_match(MIN_STAKE - 1).await.unwrap_err();
        match err {
            Error::Rejected(reason) => assert!(reason.contains("below minimum")),
            other => panic!("expected rejection, got {other:?}"),
        }

        client.start_match(500).await.unwrap();

        // Starting over an active match is refused
        let err = client.start_match(500).await.unwrap_err();
        match err {
            Error::Rejected(reason) => assert_eq!(reason, "match already active"),
            other => panic!("expected rejection, got {other:?}"),
        }

        // Budget too small for the house reply
        let err = client
            .submit_move(4, HOUSE_SEARCH_COST - 1)
            .await
            .unwrap_err();
        match err {
            Error::Rejected(reason) => assert_eq!(reason, "execution budget exceeded"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_claim_and_balance() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client(4);
        assert_eq!(client.balance().await.unwrap(), 0);

        // Win via the 2-4-6 diagonal against the first-empty house
        client.start_match(1_000).await.unwrap();
        client.submit_move(4, TEST_BUDGET).await.unwrap();
        client.submit_move(2, TEST_BUDGET).await.unwrap();
        client.submit_move(6, TEST_BUDGET).await.unwrap();

        let record = client.session().await.unwrap().unwrap();
        assert!(!record.active);
        assert!(record.player_won);

        client.claim_prize().await.unwrap();
        assert_eq!(client.balance().await.unwrap(), 2_000);

        client.withdraw().await.unwrap();
        assert_eq!(client.balance().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_client_notification_stream() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client(5);
        let other = Identity::new([6u8; 32]);

        let mut stream = client.connect_notifications().await.unwrap();
        // Give the server time to register the subscription
        sleep(Duration::from_millis(100)).await;

        // Activity for another identity is filtered out server-side
        ctx.simulator
            .apply(Submission {
                identity: other,
                action: Action::StartMatch { stake: 500 },
            })
            .unwrap();
        ctx.simulator
            .apply(Submission {
                identity: other,
                action: Action::Move {
                    cell: 0,
                    budget: TEST_BUDGET,
                },
            })
            .unwrap();

        // Our own move arrives
        client.start_match(500).await.unwrap();
        client.submit_move(4, TEST_BUDGET).await.unwrap();

        let notification = stream.next().await.unwrap().unwrap();
        assert_eq!(
            notification,
            Notification::MoveMade {
                player: client.identity,
                cell: 4
            }
        );
        let notification = stream.next().await.unwrap().unwrap();
        assert_eq!(
            notification,
            Notification::MoveMade {
                player: client.identity,
                cell: 0
            }
        );
    }

    #[test]
    fn test_client_invalid_scheme() {
        let identity = Identity::new([1u8; 32]);

        // Test invalid scheme
        let result = Client::new("ftp://example.com", identity);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(matches!(err, Error::InvalidScheme(_)));
            assert_eq!(
                err.to_string(),
                "invalid URL scheme: ftp (expected http or https)"
            );
        }

        // Test valid http scheme
        assert!(Client::new("http://localhost:8080", identity).is_ok());

        // Test valid https scheme
        assert!(Client::new("https://localhost:8080", identity).is_ok());
    }
}
