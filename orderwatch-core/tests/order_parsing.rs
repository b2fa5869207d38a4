//! Order payload parsing tests.
//!
//! Each `#[case]` is isolated; no shared state.

use chrono::{TimeZone, Utc};
use orderwatch_core::{Order, OrderId, OrderRecord, OwnerId};
use rstest::rstest;

#[rstest]
#[case::integer_id(r#"{"id": 7}"#, "7")]
#[case::unsigned_above_i64(r#"{"id": 18446744073709551615}"#, "18446744073709551615")]
#[case::whole_float_id(r#"{"id": 7.0}"#, "7")]
#[case::string_id(r#"{"id": "ord_7"}"#, "ord_7")]
#[case::uuid_id(
    r#"{"id": "5f1d7c8e-0000-4000-8000-000000000001"}"#,
    "5f1d7c8e-0000-4000-8000-000000000001"
)]
fn id_forms(#[case] json: &str, #[case] expected: &str) {
    let order: Order = serde_json::from_str(json).expect("parse");
    assert_eq!(order.id(), OrderId::from(expected));
}

#[rstest]
#[case::missing_id(r#"{"status": "new"}"#)]
#[case::null_id(r#"{"id": null}"#)]
#[case::object_id(r#"{"id": {"nested": 1}}"#)]
fn invalid_ids_are_rejected(#[case] json: &str) {
    assert!(serde_json::from_str::<Order>(json).is_err());
}

#[test]
fn created_at_feeds_record_contract() {
    let order: Order =
        serde_json::from_str(r#"{"id": 1, "created_at": "2026-03-01T12:00:00Z"}"#).expect("parse");
    assert_eq!(
        order.created_at(),
        Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    );
}

#[test]
fn serialize_keeps_unknown_columns_and_owner_column_name() {
    let order: Order = serde_json::from_str(
        r#"{"id": "a", "owner_id": "u1", "restaurant": {"name": "Bistro"}}"#,
    )
    .expect("parse");
    let value = serde_json::to_value(&order).expect("serialize");
    assert_eq!(value["user_id"], "u1");
    assert_eq!(value["restaurant"]["name"], "Bistro");
    assert!(value.get("status").is_none());
}

#[test]
fn builder_helpers_set_fields() {
    let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    let order = Order::new("x")
        .with_status("preparing")
        .with_owner("rest-1")
        .with_created_at(at);
    assert_eq!(order.status.as_deref(), Some("preparing"));
    assert_eq!(order.owner, Some(OwnerId::from("rest-1")));
    assert_eq!(order.created_at, Some(at));
}
