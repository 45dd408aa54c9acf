use bus_contract::{
    AlivePayload, BusPublisher, Direction, MemoryPublisher, RequestPayload, Topics, issue_payload,
};
use serde_json::{Value, json};

#[test]
fn topics_follow_relay_naming() {
    let topics = Topics::for_name("PSU-01");
    assert_eq!(topics.request, "Relay/Request/PSU-01");
    assert_eq!(topics.data, "Relay/Data/PSU-01");
    assert_eq!(topics.poison_pill, "Relay/PoisonPill/PSU-01");
    assert_eq!(topics.server_issue, "Relay/ServerIssue/PSU-01");
    assert_eq!(topics.comm_issue, "Relay/CommIssue/PSU-01");
}

#[test]
fn request_payload_parses_read() {
    let payload = br#"{"Read/Write":"R","Channels":{"PT-101":null,"PT-102":null}}"#;
    let request = RequestPayload::from_slice(payload).expect("parse");
    assert_eq!(request.direction().expect("direction"), Direction::Read);
    assert_eq!(request.channels.len(), 2);
    assert!(request.extra.is_empty());
}

#[test]
fn unknown_direction_is_rejected() {
    let request = RequestPayload::from_slice(br#"{"Read/Write":"X","Channels":{}}"#).expect("parse");
    assert!(request.direction().is_err());

    let request = RequestPayload::from_slice(br#"{"Channels":{}}"#).expect("parse");
    assert!(request.direction().is_err());
}

#[test]
fn forwarded_values_merge_object_keys() {
    let payload = br#"{"Read/Write":"W","Channels":{"SP":5},"Extra":{"MODE":"auto"},"Note":"x"}"#;
    let request = RequestPayload::from_slice(payload).expect("parse");
    let merged = request.forwarded_values();
    assert_eq!(merged.get("SP"), Some(&json!(5)));
    assert_eq!(merged.get("MODE"), Some(&json!("auto")));
    assert!(!merged.contains_key("Note"));
    assert!(!merged.contains_key("Read/Write"));
}

#[test]
fn alive_payload_shape() {
    let value: Value = serde_json::from_slice(&AlivePayload::instrument("PSU-01").to_bytes()).unwrap();
    assert_eq!(value, json!({"success?": "totally", "Instrument": "PSU-01"}));

    let value: Value = serde_json::from_slice(&AlivePayload::database("Recorder").to_bytes()).unwrap();
    assert_eq!(value, json!({"success?": "totally", "Database": "Recorder"}));
}

#[tokio::test]
async fn memory_publisher_records_messages() {
    let publisher = MemoryPublisher::new();
    publisher
        .publish("Relay/ServerIssue/X", issue_payload("boom"))
        .await
        .expect("publish");
    let messages = publisher.on_topic("Relay/ServerIssue/X").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].json(), Some(json!("boom")));
}
