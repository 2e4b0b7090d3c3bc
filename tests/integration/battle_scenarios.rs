//! Battle scenarios driven through the Arena facade
//!
//! Flow: MockEndpoint -> AgentRunController (per agent) -> BattleLoop -> Arena
//! read interface. Timing-sensitive scenarios use generous margins.

use std::time::{Duration, Instant};

use arena::agent::mock::{MockAttempt, MockCallKind, MockEndpoint, MockEventBuilder};
use arena::agent::{AgentError, AgentKind};
use arena::battle::{ArenaEvent, BattleStatus, FinalStatus, SchedulerState};

use super::common::fixtures::{
    arena_with, completed, delayed_complete, paced_arena_with, running, within,
};

const LIMIT: Duration = Duration::from_secs(5);

fn drain(events: &mut tokio::sync::broadcast::Receiver<ArenaEvent>) -> Vec<ArenaEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Agent A resolves in 10ms and B in 200ms; A's next attempt must wait for B.
#[tokio::test]
async fn test_round_joins_on_slowest_agent() {
    let traditional = AgentKind::Traditional;
    let fresh = AgentKind::Fresh;
    let endpoint = MockEndpoint::new()
        .with_attempt(
            traditional,
            delayed_complete(
                traditional,
                Duration::from_millis(10),
                running(traditional, FinalStatus::Partial, 100),
                BattleStatus::Running,
                None,
            ),
        )
        .with_attempt(
            fresh,
            delayed_complete(
                fresh,
                Duration::from_millis(200),
                running(fresh, FinalStatus::Partial, 80),
                BattleStatus::Running,
                None,
            ),
        )
        .with_attempt(
            traditional,
            MockAttempt::completing(
                traditional,
                completed(traditional, FinalStatus::Success, 300),
                BattleStatus::Running,
                None,
            ),
        )
        .with_attempt(
            fresh,
            MockAttempt::completing(
                fresh,
                completed(fresh, FinalStatus::Success, 160),
                BattleStatus::Completed,
                Some(fresh),
            ),
        );
    let (arena, endpoint) = arena_with(endpoint);

    let started = Instant::now();
    arena.start().await.unwrap();
    within(LIMIT, arena.wait_until_stopped()).await;

    let opens = endpoint.calls_of(MockCallKind::OpenStream, traditional);
    assert_eq!(opens.len(), 2);
    assert!(
        opens[1].at.duration_since(started) >= Duration::from_millis(200),
        "second round started before the slow agent settled"
    );
    assert_eq!(arena.snapshot().round, 2);
}

/// Chunks are visible while streaming; round 1 leaves the battle running.
#[tokio::test]
async fn test_streaming_preview_and_round_results() {
    let traditional = AgentKind::Traditional;
    let fresh = AgentKind::Fresh;
    let endpoint = MockEndpoint::new()
        .with_attempt(
            traditional,
            MockAttempt::streaming(
                MockEventBuilder::new(traditional)
                    .start()
                    .chunk("const ")
                    .chunk("app = ")
                    .chunk("express();")
                    .delay(Duration::from_millis(150))
                    .complete(
                        running(traditional, FinalStatus::Success, 420),
                        BattleStatus::Running,
                        None,
                    )
                    .build(),
            ),
        )
        .with_attempt(
            fresh,
            MockAttempt::streaming(
                MockEventBuilder::new(fresh)
                    .start()
                    .chunk("a")
                    .chunk("b")
                    .chunk("c")
                    .chunk("d")
                    .chunk("e")
                    .delay(Duration::from_millis(150))
                    .complete(
                        running(fresh, FinalStatus::Partial, 210),
                        BattleStatus::Running,
                        None,
                    )
                    .build(),
            ),
        )
        .with_attempt(
            traditional,
            delayed_complete(
                traditional,
                Duration::from_millis(100),
                completed(traditional, FinalStatus::Success, 800),
                BattleStatus::Running,
                None,
            ),
        )
        .with_attempt(
            fresh,
            delayed_complete(
                fresh,
                Duration::from_millis(100),
                completed(fresh, FinalStatus::Success, 400),
                BattleStatus::Completed,
                Some(fresh),
            ),
        );
    let (arena, _endpoint) = arena_with(endpoint);
    let mut events = arena.subscribe();

    arena.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let preview = arena.streaming();
    assert_eq!(preview.get(&traditional).map(String::as_str), Some("const app = express();"));
    assert_eq!(preview.get(&fresh).map(String::as_str), Some("abcde"));
    assert_eq!(arena.state(), SchedulerState::RoundInFlight);

    let settled = within(LIMIT, async {
        loop {
            if let Ok(ArenaEvent::RoundSettled { round }) = events.recv().await {
                return round;
            }
        }
    })
    .await;
    assert_eq!(settled, 1);

    let session = arena.session().unwrap();
    assert_eq!(session.status, BattleStatus::Running);
    assert_eq!(session.winner, None);
    assert_eq!(session.traditional_agent.final_status, Some(FinalStatus::Success));
    assert_eq!(session.ralph_agent.final_status, Some(FinalStatus::Partial));
    // Round 1 text is gone; round 2 may already have begun empty buffers
    assert!(arena.streaming().values().all(|text| text.is_empty()));

    within(LIMIT, arena.wait_until_stopped()).await;
    let session = arena.session().unwrap();
    assert_eq!(session.status, BattleStatus::Completed);
    assert_eq!(session.winner, Some(fresh));
}

/// A duplicate `complete` after the first has no effect on the session.
#[tokio::test]
async fn test_duplicate_complete_is_ignored() {
    let fresh = AgentKind::Fresh;
    let traditional = AgentKind::Traditional;
    let endpoint = MockEndpoint::new()
        .with_attempt(
            fresh,
            MockAttempt::streaming(
                MockEventBuilder::new(fresh)
                    .start()
                    .complete(
                        completed(fresh, FinalStatus::Success, 150),
                        BattleStatus::Running,
                        Some(fresh),
                    )
                    .complete(
                        completed(fresh, FinalStatus::Failure, 9999),
                        BattleStatus::Completed,
                        Some(traditional),
                    )
                    .build(),
            ),
        )
        .with_attempt(
            traditional,
            MockAttempt::completing(
                traditional,
                completed(traditional, FinalStatus::Success, 600),
                BattleStatus::Completed,
                None,
            ),
        );
    let (arena, _endpoint) = arena_with(endpoint);

    arena.start().await.unwrap();
    within(LIMIT, arena.wait_until_stopped()).await;

    let session = arena.session().unwrap();
    assert_eq!(session.ralph_agent.total_tokens, 150);
    assert_eq!(session.ralph_agent.final_status, Some(FinalStatus::Success));
    assert_eq!(session.winner, Some(fresh));
}

/// Results of a superseded session never reach the new one.
#[tokio::test]
async fn test_reset_fences_in_flight_attempts() {
    let traditional = AgentKind::Traditional;
    let fresh = AgentKind::Fresh;
    let endpoint = MockEndpoint::new();
    // First battle: slow attempts that would finish both agents
    for agent in [traditional, fresh] {
        endpoint.push_attempt(
            agent,
            delayed_complete(
                agent,
                Duration::from_millis(100),
                completed(agent, FinalStatus::Success, 9999),
                BattleStatus::Completed,
                Some(agent),
            ),
        );
    }
    // Second battle: slower attempts
    for agent in [traditional, fresh] {
        endpoint.push_attempt(
            agent,
            delayed_complete(
                agent,
                Duration::from_millis(300),
                completed(agent, FinalStatus::Partial, 50),
                BattleStatus::Running,
                None,
            ),
        );
    }
    let (arena, endpoint) = arena_with(endpoint);

    let first = arena.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    arena.reset().await;
    assert!(arena.session().is_none());
    let second = arena.start().await.unwrap();
    assert_ne!(first, second);

    // The first battle's attempts resolve while the second is in flight
    tokio::time::sleep(Duration::from_millis(180)).await;
    let session = arena.session().unwrap();
    assert_eq!(session.id, second);
    assert_eq!(session.winner, None);
    assert_eq!(session.traditional_agent.total_tokens, 0);
    assert_eq!(session.ralph_agent.total_tokens, 0);
    assert_eq!(arena.state(), SchedulerState::RoundInFlight);

    within(LIMIT, arena.wait_until_stopped()).await;
    let session = arena.session().unwrap();
    assert_eq!(session.id, second);
    assert_eq!(session.traditional_agent.total_tokens, 50);
    assert_eq!(session.winner, None);

    let resets: Vec<_> = endpoint
        .calls()
        .into_iter()
        .filter(|call| call.kind == MockCallKind::ResetSession)
        .collect();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].session, Some(first));
}

/// A superseded attempt that starts streaming late leaves the new battle's preview alone.
#[tokio::test]
async fn test_stale_stream_start_keeps_live_preview() {
    let endpoint = MockEndpoint::new();
    // First battle: streams open only after the reset
    for agent in AgentKind::ALL {
        endpoint.push_attempt(
            agent,
            MockAttempt::streaming(
                MockEventBuilder::new(agent)
                    .start()
                    .chunk("stale text")
                    .delay(Duration::from_millis(300))
                    .complete(
                        completed(agent, FinalStatus::Success, 9999),
                        BattleStatus::Completed,
                        Some(agent),
                    )
                    .build(),
            )
            .with_open_delay(Duration::from_millis(100)),
        );
    }
    // Second battle: preview text arrives before the stale streams open
    for agent in AgentKind::ALL {
        endpoint.push_attempt(
            agent,
            MockAttempt::streaming(
                MockEventBuilder::new(agent)
                    .start()
                    .delay(Duration::from_millis(30))
                    .chunk("live text")
                    .delay(Duration::from_millis(300))
                    .complete(
                        completed(agent, FinalStatus::Partial, 70),
                        BattleStatus::Running,
                        None,
                    )
                    .build(),
            ),
        );
    }
    let (arena, _endpoint) = arena_with(endpoint);

    arena.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    arena.reset().await;
    let live = arena.start().await.unwrap();

    // Stale streams have opened and sent `start` + `chunk` by now
    tokio::time::sleep(Duration::from_millis(150)).await;
    let preview = arena.streaming();
    for agent in AgentKind::ALL {
        assert_eq!(preview.get(&agent).map(String::as_str), Some("live text"));
    }

    within(LIMIT, arena.wait_until_stopped()).await;
    let session = arena.session().unwrap();
    assert_eq!(session.id, live);
    assert_eq!(session.traditional_agent.total_tokens, 70);
    assert_eq!(session.winner, None);
}

/// Scheduler fixture: round 1 leaves both agents running, round 2 finishes them.
fn two_round_endpoint() -> MockEndpoint {
    let endpoint = MockEndpoint::new();
    for agent in AgentKind::ALL {
        endpoint.push_attempt(
            agent,
            MockAttempt::completing(
                agent,
                running(agent, FinalStatus::Partial, 100),
                BattleStatus::Running,
                None,
            ),
        );
    }
    for agent in AgentKind::ALL {
        endpoint.push_attempt(
            agent,
            MockAttempt::completing(
                agent,
                completed(agent, FinalStatus::Success, 200),
                BattleStatus::Completed,
                Some(AgentKind::Fresh),
            ),
        );
    }
    endpoint
}

async fn first_round_settled(events: &mut tokio::sync::broadcast::Receiver<ArenaEvent>) {
    within(LIMIT, async {
        loop {
            if let Ok(ArenaEvent::RoundSettled { round: 1 }) = events.recv().await {
                return;
            }
        }
    })
    .await;
}

/// Pause issued during the pacing delay is honored before the next round opens.
#[tokio::test]
async fn test_pause_during_pacing_delay() {
    let (arena, endpoint) = paced_arena_with(two_round_endpoint(), Duration::from_millis(200));
    let mut events = arena.subscribe();

    arena.start().await.unwrap();
    first_round_settled(&mut events).await;
    within(LIMIT, arena.wait_for_state(SchedulerState::RoundStarting)).await;
    arena.pause().await;

    within(LIMIT, arena.wait_for_state(SchedulerState::Paused)).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(arena.state(), SchedulerState::Paused);
    for agent in AgentKind::ALL {
        assert_eq!(endpoint.stream_calls(agent), 1);
        assert_eq!(endpoint.remaining_attempts(agent), 1);
    }

    arena.resume().await;
    within(LIMIT, arena.wait_until_stopped()).await;
    let session = arena.session().unwrap();
    assert!(session.both_completed());
    assert_eq!(endpoint.stream_calls(AgentKind::Traditional), 2);
}

/// Reset issued during the pacing delay ends the loop without another round.
#[tokio::test]
async fn test_reset_during_pacing_delay() {
    let (arena, endpoint) = paced_arena_with(two_round_endpoint(), Duration::from_millis(200));
    let mut events = arena.subscribe();

    arena.start().await.unwrap();
    first_round_settled(&mut events).await;
    arena.reset().await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(arena.state(), SchedulerState::Stopped);
    assert!(arena.session().is_none());
    for agent in AgentKind::ALL {
        assert_eq!(endpoint.stream_calls(agent), 1);
        assert_eq!(endpoint.remaining_attempts(agent), 1);
    }
}

/// One agent rate limited, the other succeeds: both are joined, then the loop stops.
#[tokio::test]
async fn test_rate_limit_halts_after_join() {
    let traditional = AgentKind::Traditional;
    let fresh = AgentKind::Fresh;
    let endpoint = MockEndpoint::new()
        .with_attempt(
            traditional,
            MockAttempt::streaming(
                MockEventBuilder::new(traditional)
                    .start()
                    .error("Rate limit exceeded, please slow down")
                    .build(),
            ),
        )
        .with_attempt(
            fresh,
            delayed_complete(
                fresh,
                Duration::from_millis(100),
                running(fresh, FinalStatus::Partial, 240),
                BattleStatus::Running,
                None,
            ),
        );
    let (arena, endpoint) = arena_with(endpoint);
    let mut events = arena.subscribe();

    arena.start().await.unwrap();
    within(LIMIT, arena.wait_until_stopped()).await;

    let snapshot = arena.snapshot();
    assert!(snapshot.rate_limited);
    assert_eq!(snapshot.round, 1);
    let session = snapshot.session.unwrap();
    assert_eq!(session.ralph_agent.total_tokens, 240);
    assert_eq!(endpoint.stream_calls(fresh), 1);
    assert_eq!(endpoint.fallback_calls(traditional), 0);

    let rate_limits = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, ArenaEvent::RateLimited { .. }))
        .count();
    assert_eq!(rate_limits, 1);
}

/// Both agents rate limited in the same round still yields one notification.
#[tokio::test]
async fn test_simultaneous_rate_limits_notify_once() {
    let endpoint = MockEndpoint::new()
        .with_attempt(
            AgentKind::Traditional,
            MockAttempt::open_failure(AgentError::RateLimited {
                message: "Too many requests".into(),
                retry_after: Some(Duration::from_secs(30)),
            })
            .with_fallback(Err(AgentError::RateLimited {
                message: "Too many requests".into(),
                retry_after: Some(Duration::from_secs(30)),
            })),
        )
        .with_attempt(
            AgentKind::Fresh,
            MockAttempt::streaming(
                MockEventBuilder::new(AgentKind::Fresh)
                    .start()
                    .error("upstream returned 429")
                    .build(),
            ),
        );
    let (arena, _endpoint) = arena_with(endpoint);
    let mut events = arena.subscribe();

    arena.start().await.unwrap();
    within(LIMIT, arena.wait_until_stopped()).await;

    let notifications: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, ArenaEvent::RateLimited { .. }))
        .collect();
    assert_eq!(notifications.len(), 1);
    assert!(arena.rate_limited());
    assert_eq!(arena.state(), SchedulerState::Stopped);
}

/// Pause during a round lets the round finish, then parks the loop.
#[tokio::test]
async fn test_pause_waits_for_round_to_settle() {
    let traditional = AgentKind::Traditional;
    let fresh = AgentKind::Fresh;
    let endpoint = MockEndpoint::new()
        .with_attempt(
            traditional,
            delayed_complete(
                traditional,
                Duration::from_millis(100),
                running(traditional, FinalStatus::Partial, 111),
                BattleStatus::Running,
                None,
            ),
        )
        .with_attempt(
            fresh,
            delayed_complete(
                fresh,
                Duration::from_millis(120),
                running(fresh, FinalStatus::Failure, 222),
                BattleStatus::Running,
                None,
            ),
        )
        .with_attempt(
            traditional,
            MockAttempt::completing(
                traditional,
                completed(traditional, FinalStatus::Success, 333),
                BattleStatus::Running,
                None,
            ),
        )
        .with_attempt(
            fresh,
            MockAttempt::completing(
                fresh,
                completed(fresh, FinalStatus::Success, 444),
                BattleStatus::Completed,
                Some(fresh),
            ),
        );
    let (arena, endpoint) = arena_with(endpoint);

    arena.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    arena.pause().await;
    assert_eq!(arena.state(), SchedulerState::RoundInFlight);

    within(LIMIT, arena.wait_for_state(SchedulerState::Paused)).await;
    let session = arena.session().unwrap();
    assert_eq!(session.traditional_agent.total_tokens, 111);
    assert_eq!(session.ralph_agent.total_tokens, 222);
    assert_eq!(endpoint.stream_calls(traditional), 1);
    assert_eq!(endpoint.stream_calls(fresh), 1);

    // Still parked after a while
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(arena.state(), SchedulerState::Paused);
    assert_eq!(endpoint.stream_calls(traditional), 1);

    // Start while paused resumes the same battle
    let before = session.id;
    assert_eq!(arena.start().await.unwrap(), before);
    within(LIMIT, arena.wait_until_stopped()).await;

    let session = arena.session().unwrap();
    assert_eq!(session.id, before);
    assert!(session.both_completed());
    assert_eq!(session.winner, Some(fresh));
}

/// Start while a round is in flight is a no-op returning the live session.
#[tokio::test]
async fn test_start_while_running_is_noop() {
    let endpoint = MockEndpoint::new();
    for agent in AgentKind::ALL {
        endpoint.push_attempt(
            agent,
            delayed_complete(
                agent,
                Duration::from_millis(80),
                completed(agent, FinalStatus::Success, 10),
                BattleStatus::Completed,
                None,
            ),
        );
    }
    let (arena, endpoint) = arena_with(endpoint);

    let first = arena.start().await.unwrap();
    let again = arena.start().await.unwrap();
    assert_eq!(first, again);

    within(LIMIT, arena.wait_until_stopped()).await;
    let creates = endpoint
        .calls()
        .into_iter()
        .filter(|call| call.kind == MockCallKind::CreateSession)
        .count();
    assert_eq!(creates, 1);
}

/// A stream that drops before a terminal event recovers through the fallback.
#[tokio::test]
async fn test_transport_drop_falls_back_to_sync_call() {
    let traditional = AgentKind::Traditional;
    let fresh = AgentKind::Fresh;
    let endpoint = MockEndpoint::new()
        .with_attempt(
            traditional,
            MockAttempt::streaming(
                MockEventBuilder::new(traditional)
                    .start()
                    .chunk("function ")
                    .transport_error("connection reset by peer")
                    .build(),
            )
            .with_fallback(Ok(arena::agent::CompletePayload {
                agent_state: completed(traditional, FinalStatus::Success, 512),
                battle_status: BattleStatus::Running,
                winner: None,
            })),
        )
        .with_attempt(
            fresh,
            MockAttempt::open_failure(AgentError::Transport("connection refused".into()))
                .with_fallback(Ok(arena::agent::CompletePayload {
                    agent_state: completed(fresh, FinalStatus::Success, 256),
                    battle_status: BattleStatus::Completed,
                    winner: Some(fresh),
                })),
        );
    let (arena, endpoint) = arena_with(endpoint);
    let mut events = arena.subscribe();

    arena.start().await.unwrap();
    within(LIMIT, arena.wait_until_stopped()).await;

    assert_eq!(endpoint.fallback_calls(traditional), 1);
    assert_eq!(endpoint.fallback_calls(fresh), 1);
    let session = arena.session().unwrap();
    assert_eq!(session.traditional_agent.total_tokens, 512);
    assert_eq!(session.ralph_agent.total_tokens, 256);
    assert_eq!(session.winner, Some(fresh));
    assert!(drain(&mut events)
        .iter()
        .all(|event| !matches!(event, ArenaEvent::AgentFailed { .. })));
}

/// A malformed payload fails the attempt with the generic decode message.
#[tokio::test]
async fn test_malformed_payload_reports_agent_failure() {
    let traditional = AgentKind::Traditional;
    let fresh = AgentKind::Fresh;
    let endpoint = MockEndpoint::new()
        .with_attempt(
            traditional,
            MockAttempt::streaming(
                MockEventBuilder::new(traditional)
                    .start()
                    .raw("{\"type\": \"chunk\", \"content\":")
                    .build(),
            ),
        )
        .with_attempt(
            fresh,
            MockAttempt::completing(
                fresh,
                completed(fresh, FinalStatus::Success, 90),
                BattleStatus::Running,
                None,
            ),
        )
        .with_attempt(
            traditional,
            MockAttempt::completing(
                traditional,
                completed(traditional, FinalStatus::Failure, 700),
                BattleStatus::Completed,
                Some(fresh),
            ),
        );
    let (arena, _endpoint) = arena_with(endpoint);
    let mut events = arena.subscribe();

    arena.start().await.unwrap();
    within(LIMIT, arena.wait_until_stopped()).await;

    let failures: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ArenaEvent::AgentFailed { agent, message } => Some((agent, message)),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, traditional);
    assert!(failures[0].1.contains(arena::agent::DECODE_FAILURE_MESSAGE));
    assert!(arena.session().unwrap().both_completed());
}
