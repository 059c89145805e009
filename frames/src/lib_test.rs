use super::*;

fn message_created_frame() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 42,
        project_id: Some(7),
        from: Some("12".to_owned()),
        syscall: syscall::MESSAGE_CREATED.to_owned(),
        status: Status::Request,
        data: serde_json::json!({
            "id": 501,
            "content": "Hello",
            "attachments": [{"name": "plan.pdf", "size": 2048}],
            "reply_to": {"id": 10, "content": "Ship it"},
            "edited": false,
            "reply_to_message_id": null
        }),
    }
}

#[test]
fn status_numeric_mapping_matches_wire_enum() {
    assert_eq!(Status::Request.as_i32(), 0);
    assert_eq!(Status::Done.as_i32(), 1);
    assert_eq!(Status::Error.as_i32(), 2);
}

#[test]
fn status_from_wire_rejects_out_of_range_value() {
    let err = Status::from_i32(99).expect_err("status should be invalid");
    assert!(matches!(err, CodecError::InvalidStatus(99)));
}

#[test]
fn only_done_and_error_are_terminal() {
    assert!(!Status::Request.is_terminal());
    assert!(Status::Done.is_terminal());
    assert!(Status::Error.is_terminal());
}

#[test]
fn project_scoped_event_survives_the_wire() {
    let frame = message_created_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");

    assert_eq!(decoded.project_id, Some(7));
    assert_eq!(decoded.syscall, "message:created");
    assert_eq!(decoded.from.as_deref(), Some("12"));
    assert_eq!(decoded.data["content"], "Hello");
    assert_eq!(decoded.data["reply_to"]["content"], "Ship it");
    assert_eq!(decoded.data["reply_to_message_id"], Value::Null);
}

#[test]
fn integer_ids_come_back_as_float_numbers() {
    // Consumers must decode ids tolerantly: protobuf `Value` only carries f64.
    let decoded = decode_frame(&encode_frame(&message_created_frame())).expect("decode");
    assert_eq!(decoded.data["id"], serde_json::json!(501.0));
    assert_eq!(decoded.data["id"].as_f64(), Some(501.0));
    assert_eq!(decoded.data["id"].as_i64(), None);
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_invalid_wire_status() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        project_id: None,
        from: None,
        syscall: syscall::ROOM_JOIN.to_owned(),
        status: 77,
        data: Some(json_to_proto_value(&serde_json::json!({}))),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let err = decode_frame(&bytes).expect_err("status should fail");
    assert!(matches!(err, CodecError::InvalidStatus(77)));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_object() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        project_id: Some(9),
        from: None,
        syscall: syscall::TYPING_STOP.to_owned(),
        status: Status::Request.as_i32(),
        data: None,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
    assert_eq!(frame.project_id, Some(9));
}

#[test]
fn request_frames_get_fresh_ids_and_no_parent() {
    let a = Frame::request(syscall::ROOM_JOIN, Some(7), serde_json::json!({}));
    let b = Frame::request(syscall::ROOM_JOIN, Some(7), serde_json::json!({}));
    assert_ne!(a.id, b.id);
    assert!(a.parent_id.is_none());
    assert_eq!(a.status, Status::Request);
    assert!(a.ts > 0);
}

#[test]
fn done_reply_correlates_to_request() {
    let req = Frame::request(syscall::ROOM_LEAVE, Some(7), serde_json::json!({}));
    let done = req.done(serde_json::json!({}));
    assert_eq!(done.parent_id.as_deref(), Some(req.id.as_str()));
    assert_eq!(done.syscall, syscall::ROOM_LEAVE);
    assert_eq!(done.project_id, Some(7));
    assert_eq!(done.status, Status::Done);
}

#[test]
fn error_reply_exposes_message_text() {
    let req = Frame::request(syscall::ROOM_JOIN, Some(3), serde_json::json!({}));
    let err = req.error("not a project member");
    assert_eq!(err.status, Status::Error);
    assert_eq!(err.error_message(), "not a project member");
}

#[test]
fn error_message_falls_back_when_payload_has_none() {
    let req = Frame::request(syscall::ROOM_JOIN, Some(3), serde_json::json!({}));
    let err = req.reply(Status::Error, serde_json::json!({}));
    assert_eq!(err.error_message(), "request failed");
}

#[test]
fn status_serializes_as_lowercase_json() {
    assert_eq!(
        serde_json::to_string(&Status::Request).expect("serialize"),
        "\"request\""
    );
    assert_eq!(
        serde_json::from_str::<Status>("\"error\"").expect("deserialize"),
        Status::Error
    );
    assert!(serde_json::from_str::<Status>("\"Error\"").is_err());
}
