mod support;

use fcoord::bus::{MessageKind, Payload, Recipient};
use fcoord::events::CoordEvent;
use fcoord::Error;
use support::TestProject;

#[test]
fn broadcast_skips_sender() {
    let project = TestProject::new();
    let svc = project.service();
    for agent in ["alice", "bob", "carol"] {
        svc.register_agent(agent).unwrap();
    }

    let sent = svc
        .send_message(
            "alice",
            "*",
            MessageKind::Notification,
            Payload::Text("rebasing main".into()),
        )
        .unwrap();
    assert_eq!(sent.to, Recipient::Broadcast);

    assert_eq!(svc.pending_messages("alice"), 0);
    assert_eq!(svc.pending_messages("bob"), 1);
    assert_eq!(svc.pending_messages("carol"), 1);
}

#[test]
fn messages_arrive_in_send_order() {
    let project = TestProject::new();
    let svc = project.service();
    svc.register_agent("alice").unwrap();
    svc.register_agent("bob").unwrap();

    for text in ["one", "two", "three"] {
        svc.send_message("alice", "bob", MessageKind::Request, Payload::Text(text.into()))
            .unwrap();
    }

    let texts: Vec<String> = svc
        .get_messages("bob")
        .unwrap()
        .into_iter()
        .map(|message| match message.payload {
            Payload::Text(text) => text,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    assert_eq!(texts, ["one", "two", "three"]);
}

#[test]
fn structured_payloads_survive_persistence() {
    let project = TestProject::new();
    {
        let svc = project.service();
        svc.register_agent("alice").unwrap();
        svc.register_agent("bob").unwrap();
        svc.send_message(
            "alice",
            "bob",
            MessageKind::Response,
            Payload::Data(serde_json::json!({"build": "green", "tests": 42})),
        )
        .unwrap();
    }

    let svc = project.service();
    let inbox = svc.get_messages("bob").unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, MessageKind::Response);
    assert_eq!(
        inbox[0].payload,
        Payload::Data(serde_json::json!({"build": "green", "tests": 42}))
    );
    assert!(project.service().get_messages("bob").unwrap().is_empty());
}

#[test]
fn sends_are_published_as_events() {
    let project = TestProject::new();
    let svc = project.service();
    svc.register_agent("bob").unwrap();
    let mut events = svc.subscribe();

    svc.send_message("alice", "bob", MessageKind::Request, Payload::Text("ping".into()))
        .unwrap();

    match events.try_recv().unwrap() {
        CoordEvent::MessageSent { message } => {
            assert_eq!(message.from, "alice");
            assert!(message.to.is_agent("bob"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn unregistering_drops_the_mailbox() {
    let project = TestProject::new();
    let svc = project.service();
    svc.register_agent("bob").unwrap();
    svc.send_message("alice", "bob", MessageKind::Request, Payload::Text("ping".into()))
        .unwrap();

    assert!(svc.unregister_agent("bob").unwrap());
    assert!(!svc.unregister_agent("bob").unwrap());
    assert_eq!(svc.pending_messages("bob"), 0);
    assert!(svc.get_messages("bob").unwrap().is_empty());
}

#[test]
fn sender_id_is_validated() {
    let project = TestProject::new();
    let svc = project.service();
    let err = svc
        .send_message("", "bob", MessageKind::Request, Payload::Text("ping".into()))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}
