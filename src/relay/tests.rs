//! Relay-level tests driving `ChatRelay` against a scripted completion client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Barrier;

use super::*;
use crate::openai::{self, Message, Role};

/// Scripted completion client. Records every payload it receives; replies
/// from the script queue, or echoes the last message when the queue is empty.
struct TestClient {
    replies: Mutex<VecDeque<Result<String, openai::Error>>>,
    calls: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
    barrier: Option<Barrier>,
}

impl TestClient {
    fn echoing() -> Arc<Self> {
        Self::build(Vec::new(), None, None)
    }

    fn scripted(replies: Vec<Result<String, openai::Error>>) -> Arc<Self> {
        Self::build(replies, None, None)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Self::build(Vec::new(), Some(delay), None)
    }

    fn with_barrier(parties: usize) -> Arc<Self> {
        Self::build(Vec::new(), None, Some(Barrier::new(parties)))
    }

    fn build(
        replies: Vec<Result<String, openai::Error>>,
        delay: Option<Duration>,
        barrier: Option<Barrier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            delay,
            barrier,
        })
    }

    fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

impl CompletionClient for Arc<TestClient> {
    async fn complete(
        &self,
        _model: &str,
        messages: &[Message],
        _temperature: f32,
    ) -> Result<String, openai::Error> {
        self.calls.lock().unwrap().push(messages.to_vec());

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(scripted) = self.replies.lock().unwrap().pop_front() {
            return scripted;
        }

        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(format!("re:{last}"))
    }
}

fn relay_with(client: Arc<TestClient>, config: RelayConfig) -> ChatRelay<Arc<TestClient>> {
    ChatRelay::new(config, client)
}

fn test_config() -> RelayConfig {
    RelayConfig {
        persona: "test persona".to_string(),
        ..RelayConfig::default()
    }
}

mod message_assembly {
    use super::*;

    #[tokio::test]
    async fn test_outbound_list_is_system_plus_window() {
        let client = TestClient::echoing();
        let relay = relay_with(client.clone(), test_config());

        let reply = relay.handle_command(1, 10, "hi").await.unwrap();
        assert_eq!(reply, "re:hi");

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][0].role, Role::System);
        assert_eq!(calls[0][0].content, "test persona");
        assert_eq!(calls[0][1].role, Role::User);
        assert_eq!(calls[0][1].content, "hi");
    }

    #[tokio::test]
    async fn test_second_command_carries_prior_turns() {
        let client = TestClient::echoing();
        let relay = relay_with(client.clone(), test_config());

        relay.handle_command(1, 10, "first").await.unwrap();
        relay.handle_command(1, 10, "second").await.unwrap();

        let calls = client.calls();
        let payload = &calls[1];
        assert_eq!(payload.len(), 4);
        assert_eq!(payload[0].role, Role::System);
        assert_eq!(payload[1].content, "first");
        assert_eq!(payload[2].content, "re:first");
        assert_eq!(payload[3].content, "second");
    }

    #[tokio::test]
    async fn test_system_turn_is_never_stored() {
        let client = TestClient::echoing();
        let relay = relay_with(client.clone(), test_config());

        relay.handle_command(1, 10, "hi").await.unwrap();

        let snapshot = relay
            .history()
            .snapshot(HistoryKey { user_id: 1, chat_id: 10 })
            .await;
        assert!(snapshot.iter().all(|m| m.role != Role::System));
    }
}

mod failure_isolation {
    use super::*;

    #[tokio::test]
    async fn test_failed_call_keeps_user_turn_only() {
        let client = TestClient::scripted(vec![Err(openai::Error::Api(
            "500 Internal Server Error".to_string(),
        ))]);
        let relay = relay_with(client, test_config());

        let result = relay.handle_command(1, 10, "hi").await;
        assert!(result.is_err());

        let snapshot = relay
            .history()
            .snapshot(HistoryKey { user_id: 1, chat_id: 10 })
            .await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, Role::User);
        assert_eq!(snapshot[0].content, "hi");
    }

    #[tokio::test]
    async fn test_empty_response_is_a_failure() {
        let client = TestClient::scripted(vec![Err(openai::Error::Empty)]);
        let relay = relay_with(client, test_config());

        let result = relay.handle_command(1, 10, "hi").await;
        assert!(matches!(result, Err(openai::Error::Empty)));
    }

    #[tokio::test]
    async fn test_relay_recovers_after_failure() {
        let client = TestClient::scripted(vec![Err(openai::Error::Http(
            "connection refused".to_string(),
        ))]);
        let relay = relay_with(client, test_config());

        assert!(relay.handle_command(1, 10, "lost").await.is_err());
        let reply = relay.handle_command(1, 10, "retry").await.unwrap();
        assert_eq!(reply, "re:retry");

        // The failed command still cost a slot: its user turn stays.
        let contents: Vec<String> = relay
            .history()
            .snapshot(HistoryKey { user_id: 1, chat_id: 10 })
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["lost", "retry", "re:retry"]);
    }
}

mod capacity {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_eviction_at_capacity_two() {
        let client = TestClient::scripted(vec![
            Ok("R1".to_string()),
            Ok("R2".to_string()),
        ]);
        let config = RelayConfig {
            max_history: 2,
            ..test_config()
        };
        let relay = relay_with(client, config);
        let key = HistoryKey { user_id: 1, chat_id: 10 };

        relay.handle_command(1, 10, "A").await.unwrap();
        let contents: Vec<String> = relay
            .history()
            .snapshot(key)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["A", "R1"]);

        relay.handle_command(1, 10, "B").await.unwrap();
        let contents: Vec<String> = relay
            .history()
            .snapshot(key)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["B", "R2"]);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn test_same_key_commands_serialize() {
        let client = TestClient::with_delay(Duration::from_millis(50));
        let relay = relay_with(client.clone(), test_config());
        let key = HistoryKey { user_id: 1, chat_id: 10 };

        let (a, b) = tokio::join!(
            relay.handle_command(1, 10, "A"),
            relay.handle_command(1, 10, "B"),
        );
        a.unwrap();
        b.unwrap();

        // Turns come in whole user/assistant pairs, never interleaved.
        let snapshot = relay.history().snapshot(key).await;
        assert_eq!(snapshot.len(), 4);
        for pair in snapshot.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[1].content, format!("re:{}", pair[0].content));
        }

        // The later command saw the earlier command's full exchange.
        let mut payload_lens: Vec<usize> = client.calls().iter().map(|c| c.len()).collect();
        payload_lens.sort_unstable();
        assert_eq!(payload_lens, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_concurrently() {
        // Both calls must be in flight at once to pass the barrier; if
        // distinct keys serialized, this would never finish.
        let client = TestClient::with_barrier(2);
        let relay = relay_with(client, test_config());

        let result = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                relay.handle_command(1, 10, "A"),
                relay.handle_command(2, 10, "B"),
            )
        })
        .await;

        let (a, b) = result.expect("distinct keys should not block each other");
        assert!(a.is_ok());
        assert!(b.is_ok());
    }
}
