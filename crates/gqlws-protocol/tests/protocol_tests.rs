//! Protocol layer tests: envelope codec, payload parsing and error shapes.

#[cfg(test)]
mod tests {
    use gqlws_protocol::*;
    use serde_json::json;

    // ─────────────────────────────────────────────────────────────────────
    // MessageType
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn message_type_known_names() {
        for (raw, kind) in [
            ("connection_init", MessageType::ConnectionInit),
            ("connection_auth", MessageType::ConnectionAuth),
            ("start", MessageType::Start),
            ("stop", MessageType::Stop),
            ("connection_terminate", MessageType::ConnectionTerminate),
            ("connection_ack", MessageType::ConnectionAck),
            ("connection_error", MessageType::ConnectionError),
            ("ka", MessageType::KeepAlive),
            ("data", MessageType::Data),
            ("error", MessageType::Error),
            ("complete", MessageType::Complete),
        ] {
            assert_eq!(MessageType::from(raw), kind);
            assert_eq!(kind.as_str(), raw);
            assert!(kind.is_known());
        }
    }

    #[test]
    fn message_type_unknown_keeps_raw_name() {
        let kind = MessageType::from("subscribe");
        assert_eq!(kind, MessageType::Unknown("subscribe".into()));
        assert!(!kind.is_known());
        assert_eq!(kind.to_string(), "subscribe");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Envelope decoding
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn decode_start_message() {
        let msg = OperationMessage::decode(
            r#"{"id":"1","type":"start","payload":{"query":"subscription { tick }"}}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageType::Start);
        assert_eq!(msg.id(), "1");
        assert_eq!(msg.payload.unwrap()["query"], "subscription { tick }");
    }

    #[test]
    fn decode_connection_message_without_id() {
        let msg = OperationMessage::decode(r#"{"type":"connection_init"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::ConnectionInit);
        assert!(msg.id.is_none());
        assert_eq!(msg.id(), "");
        assert!(msg.payload.is_none());
    }

    #[test]
    fn decode_numeric_id_as_string() {
        let msg = OperationMessage::decode(r#"{"id":7,"type":"stop"}"#).unwrap();
        assert_eq!(msg.id.as_deref(), Some("7"));
    }

    #[test]
    fn decode_numeric_id_beyond_i64() {
        let msg = OperationMessage::decode(r#"{"id":18446744073709551615,"type":"stop"}"#).unwrap();
        assert_eq!(msg.id.as_deref(), Some("18446744073709551615"));

        let msg = OperationMessage::decode(r#"{"id":-3,"type":"stop"}"#).unwrap();
        assert_eq!(msg.id.as_deref(), Some("-3"));
    }

    #[test]
    fn decode_fractional_id_as_string() {
        let msg = OperationMessage::decode(r#"{"id":1.5,"type":"start","payload":{}}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Start);
        assert_eq!(msg.id.as_deref(), Some("1.5"));
    }

    #[test]
    fn decode_unknown_type_is_not_an_error() {
        let msg = OperationMessage::decode(r#"{"type":"ping","payload":{}}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown("ping".into()));
    }

    #[test]
    fn decode_invalid_json_fails() {
        let err = OperationMessage::decode("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn decode_missing_type_fails() {
        assert!(OperationMessage::decode(r#"{"id":"1"}"#).is_err());
    }

    #[test]
    fn decode_slice_matches_decode() {
        let bytes = br#"{"id":"2","type":"stop"}"#;
        let msg = OperationMessage::decode_slice(bytes).unwrap();
        assert_eq!(msg, OperationMessage::stop("2"));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Envelope encoding
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn connection_ack_omits_id_and_payload() {
        let json: serde_json::Value =
            serde_json::from_str(&OperationMessage::connection_ack().encode().unwrap()).unwrap();
        assert_eq!(json, json!({"type": "connection_ack"}));
    }

    #[test]
    fn connection_error_carries_string_reason() {
        let msg = OperationMessage::connection_error("bad token");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"type": "connection_error", "payload": "bad token"}));
    }

    #[test]
    fn data_message_shape() {
        let payload = DataPayload::new(json!({"tick": 1}), vec![]);
        let json = serde_json::to_value(OperationMessage::data("op-1", &payload)).unwrap();
        assert_eq!(json, json!({"id": "op-1", "type": "data", "payload": {"data": {"tick": 1}}}));
    }

    #[test]
    fn data_message_includes_errors_when_present() {
        let payload = DataPayload::new(
            serde_json::Value::Null,
            vec![GraphQLError::new("boom").with_path(vec![json!("tick")])],
        );
        let json = serde_json::to_value(OperationMessage::data("op-1", &payload)).unwrap();
        assert_eq!(json["payload"]["data"], serde_json::Value::Null);
        assert_eq!(json["payload"]["errors"][0]["message"], "boom");
        assert_eq!(json["payload"]["errors"][0]["path"], json!(["tick"]));
    }

    #[test]
    fn operation_error_is_a_list() {
        let msg = OperationMessage::error(Some("3".into()), &[GraphQLError::new("invalid")]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"id": "3", "type": "error", "payload": [{"message": "invalid"}]}));
    }

    #[test]
    fn connection_scoped_error_has_no_id() {
        let msg = OperationMessage::error(None, &[GraphQLError::new("invalid message")]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["payload"][0]["message"], "invalid message");
    }

    #[test]
    fn display_renders_json() {
        assert_eq!(OperationMessage::keep_alive().to_string(), r#"{"type":"ka"}"#);
    }

    // ─────────────────────────────────────────────────────────────────────
    // InitPayload
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn init_payload_missing_is_empty() {
        let payload = InitPayload::from_message(MessageType::ConnectionInit, None).unwrap();
        assert!(payload.0.is_empty());
        assert!(payload.auth_token().is_none());
    }

    #[test]
    fn init_payload_reads_auth_token_fields() {
        let value = json!({"authToken": "secret"});
        let payload = InitPayload::from_message(MessageType::ConnectionInit, Some(&value)).unwrap();
        assert_eq!(payload.auth_token(), Some("secret"));

        let value = json!({"Authorization": "Bearer x"});
        let payload = InitPayload::from_message(MessageType::ConnectionInit, Some(&value)).unwrap();
        assert_eq!(payload.auth_token(), Some("Bearer x"));
    }

    #[test]
    fn init_payload_accepts_encoded_object() {
        let value = json!(r#"{"authToken":"abc"}"#);
        let payload = InitPayload::from_message(MessageType::ConnectionInit, Some(&value)).unwrap();
        assert_eq!(payload.auth_token(), Some("abc"));
    }

    #[test]
    fn init_payload_rejects_non_object() {
        let value = json!([1, 2]);
        let err = InitPayload::from_message(MessageType::ConnectionAuth, Some(&value)).unwrap_err();
        assert!(err.to_string().starts_with("invalid connection_auth payload"));
    }

    // ─────────────────────────────────────────────────────────────────────
    // StartPayload
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn start_payload_full() {
        let value = json!({
            "query": "subscription OnTick($every: Int) { tick(every: $every) }",
            "variables": {"every": 5},
            "operationName": "OnTick"
        });
        let payload = StartPayload::from_message(Some(&value)).unwrap();
        assert_eq!(payload.operation_name.as_deref(), Some("OnTick"));
        assert_eq!(payload.variables.unwrap()["every"], 5);
    }

    #[test]
    fn start_payload_variables_as_encoded_string() {
        let value = json!({"query": "{ a }", "variables": "{\"x\": true}"});
        let payload = StartPayload::from_message(Some(&value)).unwrap();
        assert_eq!(payload.variables.unwrap()["x"], true);
    }

    #[test]
    fn start_payload_null_and_empty_variables() {
        let value = json!({"query": "{ a }", "variables": null, "operationName": null});
        let payload = StartPayload::from_message(Some(&value)).unwrap();
        assert!(payload.variables.is_none());
        assert!(payload.operation_name.is_none());

        let value = json!({"query": "{ a }", "variables": ""});
        assert!(StartPayload::from_message(Some(&value)).unwrap().variables.is_none());
    }

    #[test]
    fn start_payload_as_encoded_string() {
        let value = json!(r#"{"query":"{ a }"}"#);
        assert_eq!(StartPayload::from_message(Some(&value)).unwrap().query, "{ a }");
    }

    #[test]
    fn start_payload_missing_query_is_invalid() {
        let value = json!({"variables": {}});
        let err = StartPayload::from_message(Some(&value)).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { kind: MessageType::Start, .. }));
    }

    #[test]
    fn start_payload_empty_query_is_invalid() {
        let value = json!({"query": "   "});
        assert!(StartPayload::from_message(Some(&value)).is_err());
    }

    #[test]
    fn start_payload_missing_is_invalid() {
        assert!(StartPayload::from_message(None).is_err());
    }

    #[test]
    fn start_payload_wrong_variables_type_is_invalid() {
        let value = json!({"query": "{ a }", "variables": 12});
        assert!(StartPayload::from_message(Some(&value)).is_err());
    }

    #[test]
    fn start_message_roundtrip_through_codec() {
        let payload = StartPayload::new("subscription { tick }").with_operation_name("Tick");
        let text = OperationMessage::start("9", &payload).encode().unwrap();
        let decoded = OperationMessage::decode(&text).unwrap();
        assert_eq!(StartPayload::from_message(decoded.payload.as_ref()).unwrap(), payload);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Errors
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn graphql_error_builders() {
        let err = GraphQLError::new("denied")
            .with_location(1, 3)
            .with_extension("code", json!("FORBIDDEN"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["locations"], json!([{"line": 1, "column": 3}]));
        assert_eq!(json["extensions"]["code"], "FORBIDDEN");
        assert!(json.get("path").is_none());
    }

    #[test]
    fn protocol_error_converts_to_graphql_error() {
        let err: GraphQLError = ProtocolError::MissingId(MessageType::Start).into();
        assert_eq!(err.message, "start message is missing an operation id");
    }

    #[test]
    fn frame_too_large_message() {
        let err = ProtocolError::FrameTooLarge { size: 5000, limit: 4096 };
        assert_eq!(err.to_string(), "frame of 5000 bytes exceeds the 4096 byte read limit");
    }
}
