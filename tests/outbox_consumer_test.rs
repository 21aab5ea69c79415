mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use turnstile::application_port::*;
use turnstile::domain_model::*;
use turnstile::domain_port::*;
use turnstile::server::*;

fn role_names(roles: &[Role]) -> Vec<&str> {
    roles.iter().map(|r| r.name.as_str()).collect()
}

#[tokio::test]
async fn user_and_event_are_committed_together() {
    let h = Harness::new().await;
    let alice = h.register("alice@example.com").await.user;

    let pending = h.outbox.fetch_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    let event = &pending[0];
    assert_eq!(event.aggregate_type, AGGREGATE_USER);
    assert_eq!(event.aggregate_id, alice.id.to_string());
    assert_eq!(event.event_type, EventType::UserRegistered);
    assert_eq!(event.status, OutboxStatus::Pending);

    let payload: UserEventPayload = serde_json::from_value(event.payload.clone()).unwrap();
    assert_eq!(payload.user_id, alice.id);
}

#[tokio::test]
async fn relayed_events_are_keyed_by_user_and_marked_processed() {
    let h = Harness::new().await;
    let alice = h.register("alice@example.com").await.user;
    let bob = h.register("bob@example.com").await.user;

    let report = h.publisher.tick_once().await.unwrap();
    assert_eq!(report, TickReport { published: 2, failed: 0 });

    let queued = h.broker.peek_all(TOPIC);
    let keys: Vec<&str> = queued.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(keys, vec![alice.id.to_string(), bob.id.to_string()]);
    assert!(queued.iter().all(|m| m.event_type == "UserRegistered"));

    assert!(h.outbox.fetch_pending(10).await.unwrap().is_empty());
    let processed = h
        .db
        .read(|t| t.outbox.values().all(|e| e.processed_at.is_some()))
        .await;
    assert!(processed);

    // nothing left to relay
    let report = h.publisher.tick_once().await.unwrap();
    assert_eq!(report, TickReport::default());
}

#[tokio::test]
async fn redelivered_event_assigns_role_once() {
    let h = Harness::new().await;
    let alice = h.register("alice@example.com").await.user;

    h.publisher.tick_once().await.unwrap();
    let message = h.broker.peek_all(TOPIC).remove(0);
    h.broker.publish(TOPIC, &message).await.unwrap();

    let acked = h
        .broker
        .consume_pending(&[TOPIC], &h.dispatcher)
        .await
        .unwrap();
    assert_eq!(acked, 2);

    let roles = h.rbac.list_roles_for_user(alice.id).await.unwrap();
    assert_eq!(role_names(&roles), vec![ROLE_USER]);

    let user_role = h.rbac.get_role_by_name(ROLE_USER).await.unwrap();
    let holders = h.rbac.list_users_for_role(user_role.id).await.unwrap();
    assert_eq!(holders, vec![alice.id]);
}

#[tokio::test]
async fn malformed_payload_goes_straight_to_dlq() {
    let h = Harness::new().await;
    let poison = QueueMessage {
        key: "k".to_string(),
        event_type: EventType::UserRegistered.to_string(),
        event_id: "999".to_string(),
        payload: b"{not json".to_vec(),
    };
    h.broker.publish(TOPIC, &poison).await.unwrap();

    let acked = h
        .broker
        .consume_pending(&[TOPIC], &h.dispatcher)
        .await
        .unwrap();
    assert_eq!(acked, 1);
    assert!(h.broker.is_empty(TOPIC));
    assert_eq!(h.broker.peek_all(&dlq_topic_for(TOPIC)), vec![poison]);
}

#[tokio::test]
async fn persistent_handler_failure_is_retried_then_dead_lettered() {
    let h = Harness::new().await;
    let retry = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(1),
        multiplier: 2.0,
    };
    let dispatcher = EventDispatcher::new(h.broker.clone(), &dlq_topic_for(TOPIC), retry).register(
        EventType::UserRegistered.as_str(),
        Arc::new(RoleAssignmentHandler::new(h.rbac.clone(), "no-such-role")),
    );

    h.register("alice@example.com").await;
    h.publisher.tick_once().await.unwrap();
    let message = h.broker.peek_all(TOPIC).remove(0);

    let outcome = dispatcher.dispatch(&message).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::DeadLettered { attempts: 3 });
    assert_eq!(h.broker.peek_all(&dlq_topic_for(TOPIC)), vec![message]);
}

#[tokio::test]
async fn unknown_event_type_is_acknowledged() {
    let h = Harness::new().await;
    let message = QueueMessage {
        key: "k".to_string(),
        event_type: "UserRenamed".to_string(),
        event_id: "1".to_string(),
        payload: b"{}".to_vec(),
    };

    let outcome = h.dispatcher.dispatch(&message).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::UnknownType);
    assert!(h.broker.is_empty(&dlq_topic_for(TOPIC)));
}

#[tokio::test]
async fn background_consumer_drains_the_topic() {
    let h = Harness::new().await;
    let alice = h.register("alice@example.com").await.user;
    h.publisher.tick_once().await.unwrap();

    let dispatcher = Arc::new(identity_event_dispatcher(
        h.rbac.clone(),
        h.broker.clone(),
        TOPIC,
        RetryPolicy::default(),
    ));
    let broker = h.broker.clone();
    let consumer = tokio::spawn(async move { broker.run("test", &[TOPIC], dispatcher).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.rbac.list_roles_for_user(alice.id).await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(h.broker.is_empty(TOPIC));

    h.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
