//! Cross-agent bus scenarios, including the lockstep counting relay.

use std::sync::Arc;

use squadron::bus::MessageBus;

/// Two agents alternate over group chat, counting to ten. Every handoff
/// must be driven by a wait wake-up, never a timeout.
#[tokio::test]
async fn test_counting_relay_one_to_ten() {
    let bus = Arc::new(MessageBus::new());
    let team = "relay";

    let even = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            for _ in 0..5 {
                let outcome = bus.wait(team, "even", false, Some(30_000)).await.unwrap();
                assert!(!outcome.timed_out, "even agent timed out");
                assert!(!outcome.dissolved);

                for msg in bus.group_read(team, "even") {
                    let n: u32 = msg.text.parse().expect("numeric relay message");
                    bus.group_post(team, "even", "agent", &(n + 1).to_string());
                }
            }
        })
    };

    let odd = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            bus.group_post(team, "odd", "agent", "1");
            for _ in 0..4 {
                let outcome = bus.wait(team, "odd", false, Some(30_000)).await.unwrap();
                assert!(!outcome.timed_out, "odd agent timed out");

                let received = bus.group_read(team, "odd");
                let n: u32 = received
                    .last()
                    .expect("expected an even number")
                    .text
                    .parse()
                    .unwrap();
                bus.group_post(team, "odd", "agent", &(n + 1).to_string());
            }
            // Consume the final 10 so nothing dangles unread.
            let outcome = bus.wait(team, "odd", false, Some(30_000)).await.unwrap();
            assert!(!outcome.timed_out);
            bus.group_read(team, "odd");
        })
    };

    // The relay must complete on wake-ups, well inside the watchdog.
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        odd.await.unwrap();
        even.await.unwrap();
    })
    .await
    .expect("relay did not complete in time");

    let log: Vec<String> = bus
        .group_snapshot(team)
        .into_iter()
        .map(|m| m.text)
        .collect();
    let expected: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
    assert_eq!(log, expected);
}

#[tokio::test]
async fn test_wait_liveness_under_many_waiters() {
    let bus = Arc::new(MessageBus::new());

    let waiters: Vec<_> = (0..8)
        .map(|i| {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                bus.wait("t", &format!("agent-{}", i), false, Some(30_000))
                    .await
                    .unwrap()
            })
        })
        .collect();
    tokio::task::yield_now().await;

    bus.group_post("t", "sender", "dev", "fan out");

    for waiter in waiters {
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake promptly")
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.group, 1);
    }
}

#[tokio::test]
async fn test_dm_wakes_only_the_recipient() {
    let bus = Arc::new(MessageBus::new());

    let recipient = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { bus.wait("t", "r", false, Some(30_000)).await.unwrap() })
    };
    let bystander = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { bus.wait("t", "other", false, Some(1_000)).await.unwrap() })
    };
    tokio::task::yield_now().await;

    bus.dm_send("s", "r", "dev", "direct");

    let woken = recipient.await.unwrap();
    assert_eq!(woken.dms, 1);

    let ignored = bystander.await.unwrap();
    assert!(ignored.timed_out);
}

#[tokio::test]
async fn test_dissolution_wakes_member_waiting_on_dms() {
    let bus = Arc::new(MessageBus::new());

    let waiter = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move { bus.wait("t1", "member", false, Some(30_000)).await.unwrap() })
    };
    tokio::task::yield_now().await;

    bus.dissolve_team("t1", &["member".to_string()]);
    let outcome = waiter.await.unwrap();
    assert!(outcome.dissolved);
}
