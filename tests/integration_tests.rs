//! Integration tests for the anteroom lobby service
//!
//! These drive the public command surface of `LobbyManager` end to end:
//! - the lobby lifecycle from create to start
//! - concurrent joins racing for the last slot
//! - pruning, rate limiting and region resolution
//! - snapshot persistence and coordinated restart

mod fixtures;

use anteroom::clock::ManualClock;
use anteroom::lobby::{Command, CommandReply, LobbyState};
use anteroom::snapshot::{FileSnapshotStorage, SnapshotStorage};
use anteroom::types::{Region, Tier};
use chrono::Duration;
use fixtures::*;
use proptest::prelude::*;
use std::sync::Arc;

#[tokio::test]
async fn test_complete_lobby_workflow() {
    let system = TestSystem::new().await;
    let m = &system.manager;

    let created = m
        .create(OPEN, "h1", Some(Region::NA), Some(Tier::new(10).unwrap()))
        .await
        .unwrap();
    assert_eq!(created.lobby.state, LobbyState::Open);
    assert_eq!(created.lobby.size, 1);

    let lobby = m.join(OPEN, "u2", by_host("h1")).await.unwrap();
    assert_eq!(lobby.state, LobbyState::Open);
    assert_eq!(lobby.size, 2);

    for n in 3..=8 {
        m.join(OPEN, &format!("u{}", n), by_host("h1")).await.unwrap();
    }
    let info = m.info(OPEN, "h1").await.unwrap();
    assert_eq!(info.state, LobbyState::Full);
    assert_eq!(info.size, 8);

    let started = m.start(OPEN, "h1", false).await.unwrap();
    assert!(!started.forced);
    assert_eq!(started.roster.len(), 8);
    assert_eq!(started.roster[0].participant, "h1");
    assert!(started.roster[0].is_host);
    assert!(started.roster[1..].iter().all(|entry| !entry.is_host));
    assert_eq!(started.roster[1].participant, "u2");

    assert_eq!(m.info(OPEN, "h1").await.unwrap_err().tag(), "lobby_not_found");

    let kinds = system.events.kinds();
    assert_eq!(kinds.first(), Some(&"created"));
    assert_eq!(kinds.iter().filter(|k| **k == "joined").count(), 7);
    assert_eq!(kinds[kinds.len() - 2..], ["filled", "started"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_race_for_last_slot() {
    let tiers = ScriptedTierLookup::new()
        .with_fallback(12)
        .with_delay(std::time::Duration::from_millis(50));
    let system = TestSystem::with_tiers(tiers).await;
    system.lobby_with(OPEN_NA, "h1", Region::NA, 6).await;
    assert_eq!(system.manager.info(OPEN_NA, "h1").await.unwrap().size, 7);

    let first = {
        let manager = system.manager.clone();
        tokio::spawn(async move { manager.join(OPEN_NA, "racer-a", by_host("h1")).await })
    };
    let second = {
        let manager = system.manager.clone();
        tokio::spawn(async move { manager.join(OPEN_NA, "racer-b", by_host("h1")).await })
    };

    let results = vec![first.await.unwrap(), second.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(failure.tag(), "lobby_full");

    let lobby = system.manager.info(OPEN_NA, "h1").await.unwrap();
    assert_eq!(lobby.size, 8);
    assert_eq!(lobby.state, LobbyState::Full);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_region_joins_never_overfill() {
    let tiers = ScriptedTierLookup::new()
        .with_fallback(12)
        .with_delay(std::time::Duration::from_millis(5));
    let system = TestSystem::with_tiers(tiers).await;
    for n in 0..5 {
        system
            .manager
            .create(OPEN_EU, &format!("h{}", n), None, None)
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..40)
        .map(|n| {
            let manager = system.manager.clone();
            tokio::spawn(async move {
                manager
                    .join(OPEN_EU, &format!("seeker{}", n), by_region(Region::EU))
                    .await
            })
        })
        .collect();

    let mut joined = 0;
    let mut all_full = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(_) => joined += 1,
            Err(e) => {
                assert_eq!(e.tag(), "all_full");
                all_full += 1;
            }
        }
    }
    assert_eq!(joined, 35);
    assert_eq!(all_full, 5);

    let snapshot = system.manager.store().snapshot().await.unwrap();
    snapshot.validate(8).unwrap();
    assert!(snapshot.partitions()[OPEN_EU]
        .values()
        .all(|lobby| lobby.size() == 8));
}

#[tokio::test]
async fn test_leave_twice_is_not_member_both_times() {
    let system = TestSystem::new().await;
    system.lobby_with(OPEN_NA, "h1", Region::NA, 2).await;
    let before = system.manager.store().snapshot().await.unwrap();

    for _ in 0..2 {
        let err = system.manager.leave(OPEN_NA, "stranger").await.unwrap_err();
        assert_eq!(err.tag(), "not_member");
    }

    assert_eq!(system.manager.store().snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn test_host_cannot_leave_but_can_cancel() {
    let system = TestSystem::new().await;
    system.lobby_with(OPEN_NA, "h1", Region::NA, 1).await;

    assert_eq!(
        system.manager.leave(OPEN_NA, "h1").await.unwrap_err().tag(),
        "cannot_remove_host"
    );
    let participants = system.manager.cancel(OPEN_NA, "h1").await.unwrap();
    assert_eq!(participants, vec!["h1".to_string(), "h1-1".to_string()]);
    assert_eq!(system.events.kinds().last(), Some(&"cancelled"));
}

#[tokio::test]
async fn test_idle_lobby_is_pruned_before_listing() {
    let system = TestSystem::new().await;
    system.lobby_with(OPEN_NA, "stale", Region::NA, 0).await;
    system.clock.advance(Duration::minutes(16));
    system.lobby_with(OPEN_NA, "fresh", Region::NA, 0).await;

    let listed = system.manager.list(OPEN_NA, false).await.unwrap();
    let hosts: Vec<_> = listed.iter().map(|l| l.host.as_str()).collect();
    assert_eq!(hosts, vec!["fresh"]);

    assert!(system
        .manager
        .store()
        .find_by_host(OPEN_NA, "stale")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        system
            .events
            .kinds()
            .iter()
            .filter(|k| **k == "pruned")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_full_idle_lobby_pruned_after_ten_minutes() {
    let system = TestSystem::new().await;
    system.lobby_with(OPEN_NA, "full", Region::NA, 7).await;
    system.lobby_with(OPEN_NA, "open", Region::NA, 3).await;
    system.clock.advance(Duration::minutes(11));

    let listed = system.manager.list(OPEN_NA, false).await.unwrap();
    let hosts: Vec<_> = listed.iter().map(|l| l.host.as_str()).collect();
    assert_eq!(hosts, vec!["open"]);
}

#[tokio::test]
async fn test_exempt_league_keeps_idle_lobbies() {
    let tiers = ScriptedTierLookup::new().with_fallback(20);
    let system = TestSystem::with_tiers(tiers).await;
    system.lobby_with(BISHOP, "h1", Region::EU, 0).await;
    system.clock.advance(Duration::hours(2));

    assert_eq!(system.manager.list(BISHOP, false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_region_join_prefers_fuller_lobby() {
    let system = TestSystem::new().await;
    system.lobby_with(OPEN, "small", Region::EU, 2).await;
    system.clock.advance(Duration::seconds(1));
    system.lobby_with(OPEN, "large", Region::EU, 4).await;
    system.lobby_with(OPEN, "other", Region::NA, 6).await;

    let joined = system
        .manager
        .join(OPEN, "seeker", by_region(Region::EU))
        .await
        .unwrap();
    assert_eq!(joined.host, "large");
    assert_eq!(joined.size, 6);
}

#[tokio::test]
async fn test_region_join_tie_goes_to_oldest() {
    let system = TestSystem::new().await;
    system.lobby_with(OPEN, "older", Region::EU, 2).await;
    system.clock.advance(Duration::seconds(30));
    system.lobby_with(OPEN, "newer", Region::EU, 2).await;

    let joined = system
        .manager
        .join(OPEN, "seeker", by_region(Region::EU))
        .await
        .unwrap();
    assert_eq!(joined.host, "older");
}

#[tokio::test]
async fn test_region_join_outcomes() {
    let system = TestSystem::new().await;
    let m = &system.manager;

    assert_eq!(
        m.join(OPEN, "s1", by_region(Region::EU)).await.unwrap_err().tag(),
        "none_exist"
    );

    system.lobby_with(OPEN, "na", Region::NA, 0).await;
    assert_eq!(
        m.join(OPEN, "s1", by_region(Region::EU)).await.unwrap_err().tag(),
        "none_eligible"
    );

    system.lobby_with(OPEN, "eu", Region::EU, 7).await;
    assert_eq!(
        m.join(OPEN, "s1", by_region(Region::EU)).await.unwrap_err().tag(),
        "all_full"
    );
}

#[tokio::test]
async fn test_list_rate_limit_window() {
    let system = TestSystem::new().await;
    let m = &system.manager;

    assert!(m.list(OPEN_NA, false).await.is_ok());
    system.clock.advance(Duration::seconds(10));
    assert_eq!(m.list(OPEN_NA, false).await.unwrap_err().tag(), "rate_limited");

    // Other partitions have their own gate
    assert!(m.list(OPEN_EU, false).await.is_ok());

    system.clock.advance(Duration::seconds(5));
    assert!(m.list(OPEN_NA, false).await.is_ok());
}

#[tokio::test]
async fn test_snapshot_round_trip_through_file() {
    let path = std::env::temp_dir().join(format!("anteroom_it_{}.json", uuid::Uuid::new_v4()));
    let storage = Arc::new(FileSnapshotStorage::new(path.clone()));
    let clock = ManualClock::from_millis(1_700_000_000_000);

    let original = TestSystem::with_storage(storage.clone(), clock.clone()).await;
    original.lobby_with(OPEN_NA, "h1", Region::NA, 3).await;
    clock.advance(Duration::minutes(2));
    original.lobby_with(OPEN, "h2", Region::EU, 1).await;
    original.snapshots.save_now().await.unwrap();
    let before = original.manager.store().snapshot().await.unwrap();

    let restored = TestSystem::with_storage(storage.clone(), clock.clone()).await;
    let after = restored.manager.store().snapshot().await.unwrap();
    assert_eq!(after, before);

    let stored = storage.load().await.unwrap().unwrap();
    let lobby = &stored.partitions()[OPEN_NA]["h1"];
    assert_eq!(lobby.participants()[0], "h1");
    assert_eq!(lobby.participants()[3], "h1-3");
    assert_eq!(lobby.created_at().timestamp_millis(), 1_700_000_000_000);

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let path = std::env::temp_dir().join(format!("anteroom_bad_{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, "{ not json").unwrap();

    let system = TestSystem::with_storage(
        Arc::new(FileSnapshotStorage::new(path.clone())),
        ManualClock::default(),
    )
    .await;
    let status = system.manager.status().await.unwrap();
    assert!(status.partitions.iter().any(|p| p.name == OPEN_EU));
    assert!(status.partitions.iter().all(|p| p.lobbies == 0));

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_pause_and_resume_for_restart() {
    let system = TestSystem::new().await;
    system.lobby_with(OPEN_NA, "h1", Region::NA, 2).await;

    let status = system.manager.pause().await;
    assert!(status.paused);
    assert!(!status.pending);
    assert_eq!(
        system
            .manager
            .join(OPEN_NA, "late", by_host("h1"))
            .await
            .unwrap_err()
            .tag(),
        "commands_paused"
    );

    assert_eq!(system.manager.resume().await.unwrap(), 1);
    assert_eq!(
        system
            .manager
            .join(OPEN_NA, "late", by_host("h1"))
            .await
            .unwrap()
            .size,
        4
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pause_during_tier_lookup_never_loses_an_accepted_join() {
    let tiers = ScriptedTierLookup::new()
        .with_fallback(12)
        .with_delay(std::time::Duration::from_millis(300));
    let system = TestSystem::with_tiers(tiers).await;
    system.lobby_with(OPEN_NA, "h1", Region::NA, 0).await;

    let join = {
        let manager = system.manager.clone();
        tokio::spawn(async move { manager.join(OPEN_NA, "u2", by_host("h1")).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let status = system.manager.pause().await;
    assert!(status.paused);
    let result = join.await.unwrap();
    assert_eq!(result.unwrap_err().tag(), "commands_paused");

    let stored = system.snapshots.store().find_by_host(OPEN_NA, "h1").await.unwrap();
    assert_eq!(stored.unwrap().size(), 1);

    assert_eq!(system.manager.resume().await.unwrap(), 1);
    let lobby = system.manager.info(OPEN_NA, "h1").await.unwrap();
    assert_eq!(lobby.size, 1);
    assert!(!system.events.kinds().contains(&"joined"));
}

#[tokio::test]
async fn test_unavailable_rank_service_leaves_state_unchanged() {
    let tiers = ScriptedTierLookup::new();
    tiers.set("h1", 12);
    let system = TestSystem::with_tiers(tiers).await;
    system.lobby_with(OPEN_NA, "h1", Region::NA, 0).await;

    let err = system
        .manager
        .join(OPEN_NA, "nobody", by_host("h1"))
        .await
        .unwrap_err();
    assert_eq!(err.tag(), "unknown_tier");
    assert_eq!(system.manager.info(OPEN_NA, "h1").await.unwrap().size, 1);
    assert_eq!(system.events.kinds(), vec!["created"]);
}

#[tokio::test]
async fn test_execute_serialized_commands() {
    let system = TestSystem::new().await;

    let create: Command = serde_json::from_str(
        r#"{"command":"create","partition":"open-lobbies","host":"h1","region":"eu","min_tier":"Knight-3"}"#,
    )
    .unwrap();
    let reply = system.manager.execute(create).await;
    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["reply"], "created");
    assert!(json["credential"].as_str().unwrap().starts_with("eu_"));

    let join: Command = serde_json::from_str(
        r#"{"command":"join","partition":"open-lobbies","seeker":"u2","host":"h1"}"#,
    )
    .unwrap();
    assert!(matches!(
        system.manager.execute(join).await,
        CommandReply::Joined { ref lobby } if lobby.size == 2
    ));

    let start: Command = serde_json::from_str(
        r#"{"command":"start","partition":"open-lobbies","host":"u2"}"#,
    )
    .unwrap();
    let json = serde_json::to_value(system.manager.execute(start).await).unwrap();
    assert_eq!(json["reply"], "error");
    assert_eq!(json["error"], "not_authorized");
}

#[derive(Debug, Clone)]
enum Op {
    Create(usize),
    JoinHost(usize, usize),
    JoinRegion(usize),
    Leave(usize),
    Kick(usize, usize),
    Start(usize),
    Cancel(usize),
}

fn op() -> impl Strategy<Value = Op> {
    let id = 0usize..16;
    prop_oneof![
        id.clone().prop_map(Op::Create),
        (id.clone(), id.clone()).prop_map(|(a, b)| Op::JoinHost(a, b)),
        id.clone().prop_map(Op::JoinRegion),
        id.clone().prop_map(Op::Leave),
        (id.clone(), id.clone()).prop_map(|(a, b)| Op::Kick(a, b)),
        id.clone().prop_map(Op::Start),
        id.prop_map(Op::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_membership_and_capacity_hold(ops in prop::collection::vec(op(), 1..60)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let system = TestSystem::new().await;
            let m = &system.manager;
            let p = |n: usize| format!("p{}", n);

            for op in ops {
                // Individual commands may fail; the invariants must hold regardless
                let _ = match op {
                    Op::Create(h) => m.create(OPEN_EU, &p(h), None, None).await.map(|_| ()),
                    Op::JoinHost(s, h) => m.join(OPEN_EU, &p(s), by_host(&p(h))).await.map(|_| ()),
                    Op::JoinRegion(s) => m.join(OPEN_EU, &p(s), by_region(Region::EU)).await.map(|_| ()),
                    Op::Leave(s) => m.leave(OPEN_EU, &p(s)).await.map(|_| ()),
                    Op::Kick(h, t) => m.kick(OPEN_EU, &p(h), &p(t)).await.map(|_| ()),
                    Op::Start(h) => m.start(OPEN_EU, &p(h), true).await.map(|_| ()),
                    Op::Cancel(h) => m.cancel(OPEN_EU, &p(h)).await.map(|_| ()),
                };

                let snapshot = m.store().snapshot().await.unwrap();
                snapshot.validate(8).unwrap();
                for (host, lobby) in &snapshot.partitions()[OPEN_EU] {
                    assert_eq!(lobby.participants()[0], *host);
                    assert!((1..=8).contains(&lobby.size()));
                }
            }
        });
    }
}
