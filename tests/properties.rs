use proptest::prelude::*;
use serde_json::{json, Map, Value};
use uniproxy::protocol::handler::ProtocolHandler;
use uniproxy::state::response_cache::fingerprint;

fn arb_params() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z]{1,8}", prop_oneof![
        any::<i64>().prop_map(Value::from),
        "\\PC{0,16}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ], 0..6)
    .prop_map(|m| m.into_iter().filter(|(k, _)| k != "_meta").collect())
}

proptest! {
    #[test]
    fn test_fingerprint_ignores_meta(params in arb_params(), token in any::<u32>()) {
        let plain = Value::Object(params.clone());
        let mut with_meta = params;
        with_meta.insert("_meta".into(), json!({"progressToken": token}));
        prop_assert_eq!(
            fingerprint("tools/list", Some(&plain)),
            fingerprint("tools/list", Some(&Value::Object(with_meta)))
        );
    }

    #[test]
    fn test_fingerprint_separates_methods(params in arb_params()) {
        let params = Value::Object(params);
        prop_assert_ne!(
            fingerprint("prompts/list", Some(&params)),
            fingerprint("tools/list", Some(&params))
        );
    }

    #[test]
    fn test_classify_never_panics(body in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = ProtocolHandler::classify(&body);
    }

    #[test]
    fn test_classify_keeps_request_id(id in any::<i64>(), method in "[a-z]{1,10}(/[a-z]{1,10})?") {
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method}).to_string();
        let message = ProtocolHandler::classify(body.as_bytes()).unwrap();
        prop_assert_eq!(message.reply_id(), json!(id));
        prop_assert_eq!(message.method(), Some(method.as_str()));
    }
}
