mod support;

use std::sync::Arc;
use std::time::Duration;

use fcoord::bus::{MessageKind, Payload};
use fcoord::events::CoordEvent;
use fcoord::intent::AgentIntent;
use fcoord::watch::PollingSource;
use support::TestProject;

fn claim(svc: &fcoord::CoordinationService, agent: &str, target: &str) {
    svc.declare_intent(
        AgentIntent::builder(agent)
            .description("schema migration")
            .target(target)
            .build()
            .unwrap(),
    )
    .unwrap();
}

/// Answer the first coordination request seen on the event stream.
fn spawn_responder(
    svc: Arc<fcoord::CoordinationService>,
    responder: &'static str,
    approved: bool,
) -> tokio::task::JoinHandle<()> {
    let mut events = svc.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let CoordEvent::MessageSent { message } = event else {
                continue;
            };
            if let Payload::CoordinationRequest { path, .. } = &message.payload {
                svc.respond_to_coordination(responder, &message.from, path, approved)
                    .unwrap();
                return;
            }
        }
    })
}

#[tokio::test]
async fn approval_from_other_agent_grants_access() {
    let project = TestProject::new();
    let svc = Arc::new(project.service());
    svc.register_agent("alice").unwrap();
    svc.register_agent("bob").unwrap();
    claim(&svc, "bob", "/repo/db");

    let responder = spawn_responder(Arc::clone(&svc), "bob", true);
    let approved = svc
        .coordinate_file_access("/repo/db/schema.sql", "alice", "write")
        .await
        .unwrap();
    responder.await.unwrap();

    assert!(approved);
    // The answer was consumed along with the event.
    assert_eq!(
        svc.take_coordination_verdict("alice", "/repo/db/schema.sql").unwrap(),
        None
    );
}

#[tokio::test]
async fn denial_from_other_agent_refuses_access() {
    let project = TestProject::new();
    let svc = Arc::new(project.service());
    svc.register_agent("alice").unwrap();
    svc.register_agent("bob").unwrap();
    claim(&svc, "bob", "/repo/db");

    let responder = spawn_responder(Arc::clone(&svc), "bob", false);
    let approved = svc
        .coordinate_file_access("/repo/db/schema.sql", "alice", "write")
        .await
        .unwrap();
    responder.await.unwrap();

    assert!(!approved);
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let project = TestProject::new();
    let svc = project.service();
    svc.register_agent("alice").unwrap();
    svc.register_agent("bob").unwrap();
    claim(&svc, "bob", "/repo/db");

    let started = tokio::time::Instant::now();
    let approved = svc
        .coordinate_file_access("/repo/db/schema.sql", "alice", "write")
        .await
        .unwrap();

    assert!(!approved);
    assert!(started.elapsed() >= Duration::from_millis(300));
    let inbox = svc.get_messages("bob").unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, MessageKind::Coordination);
}

#[tokio::test]
async fn background_worker_observes_polled_changes() {
    let project = TestProject::new();
    let file = project.write_file("plan.md", "draft");
    let (source, changes) = PollingSource::new(Duration::from_millis(20)).unwrap();
    let svc = Arc::new(project.service().with_change_source(Arc::new(source)));
    svc.track_file(&file, "alice").unwrap();

    let handle = Arc::clone(&svc).spawn_background(Some(changes));
    tokio::time::sleep(Duration::from_millis(60)).await;
    std::fs::write(&file, "draft, now with a second paragraph").unwrap();

    let mut version = 1;
    for _ in 0..100 {
        version = svc.file_state(&file).unwrap().version;
        if version > 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.shutdown().await.unwrap();

    assert_eq!(version, 2);
}

#[tokio::test]
async fn background_worker_syncs_periodically() {
    let project = TestProject::new();
    let svc = Arc::new(project.service());
    let mut events = svc.subscribe();

    let handle = Arc::clone(&svc).spawn_background(None);
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await.unwrap();

    // Sync emits no events; only the state file shows it ran.
    assert!(events.try_recv().is_err());
    assert!(project.state_dir().join("shared_context.json").is_file());
}

#[tokio::test]
async fn responses_to_earlier_requests_do_not_answer_new_ones() {
    let project = TestProject::new();
    let svc = project.service();
    svc.register_agent("alice").unwrap();
    svc.register_agent("bob").unwrap();
    claim(&svc, "bob", "/repo/db");

    // A late approval left over from a request that already timed out.
    svc.respond_to_coordination("bob", "alice", "/repo/db/schema.sql", true)
        .unwrap();

    let conflicts = svc
        .request_coordination("/repo/db/schema.sql", "alice", "write")
        .unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(
        svc.take_coordination_verdict("alice", "/repo/db/schema.sql").unwrap(),
        None
    );

    svc.respond_to_coordination("bob", "alice", "/repo/db/schema.sql", false)
        .unwrap();
    assert_eq!(
        svc.take_coordination_verdict("alice", "/repo/db/schema.sql").unwrap(),
        Some(false)
    );
}

#[tokio::test]
async fn stale_approval_does_not_skip_the_wait() {
    let project = TestProject::new();
    let svc = project.service();
    svc.register_agent("alice").unwrap();
    svc.register_agent("bob").unwrap();
    claim(&svc, "bob", "/repo/db");
    svc.respond_to_coordination("bob", "alice", "/repo/db/schema.sql", true)
        .unwrap();

    let approved = svc
        .coordinate_file_access("/repo/db/schema.sql", "alice", "write")
        .await
        .unwrap();
    assert!(!approved);
}

#[tokio::test]
async fn approval_lost_in_event_backlog_is_read_from_mailbox() {
    let project = TestProject::new();
    let svc = Arc::new(project.service());
    for agent in ["alice", "bob", "carol"] {
        svc.register_agent(agent).unwrap();
    }
    claim(&svc, "bob", "/repo/db");

    let mut events = svc.subscribe();
    let busy = Arc::clone(&svc);
    let responder = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let CoordEvent::MessageSent { message } = event else {
                continue;
            };
            if let Payload::CoordinationRequest { path, .. } = &message.payload {
                busy.respond_to_coordination("bob", "alice", path, true)
                    .unwrap();
                // Push the reply out of every receiver's window.
                for n in 0..300 {
                    busy.send_message(
                        "bob",
                        "carol",
                        MessageKind::Notification,
                        Payload::Text(format!("progress {n}")),
                    )
                    .unwrap();
                }
                return;
            }
        }
    });

    let approved = svc
        .coordinate_file_access("/repo/db/schema.sql", "alice", "write")
        .await
        .unwrap();
    responder.await.unwrap();

    assert!(approved);
    assert!(svc.pending_messages("carol") > 256);
}
