use pretty_assertions::assert_eq;
use tracker_core::{
    build_batch, on_created, select, Datapoint, DatapointId, Effect, ExtractionKind, Selection,
    SkipReason, Status, ValueKind,
};

fn dp(id: u64, url: &str, xpath: &str, kind: ValueKind) -> Datapoint {
    Datapoint::new(DatapointId(id), format!("dp-{id}"), url, xpath, kind)
}

#[test]
fn missing_locator_or_rule_is_skipped_with_stable_reason() {
    let input = vec![
        dp(1, "", "//h1", ValueKind::Text),
        dp(2, "https://a.example.com", "", ValueKind::Text),
        dp(3, "https://a.example.com", "//h1", ValueKind::Text),
    ];

    let plan = build_batch(&input);

    assert_eq!(plan.tasks.len(), 1);
    assert_eq!(plan.tasks[0].correlation, Some(DatapointId(3)));
    let skipped: Vec<_> = plan
        .skipped
        .iter()
        .map(|(dp, reason)| (dp.id, reason.as_str()))
        .collect();
    assert_eq!(
        skipped,
        vec![
            (DatapointId(1), "missing locator or rule"),
            (DatapointId(2), "missing locator or rule"),
        ]
    );
    assert_eq!(plan.skipped[0].1, SkipReason::MissingLocatorOrRule);
}

#[test]
fn display_kinds_default_to_text_with_warning() {
    let input = vec![
        dp(1, "https://a.example.com", "//h1", ValueKind::Integer),
        dp(2, "https://a.example.com", "//div", ValueKind::Markup),
    ];

    let plan = build_batch(&input);

    assert_eq!(plan.tasks[0].kind, ExtractionKind::Text);
    assert_eq!(plan.tasks[1].kind, ExtractionKind::Markup);
    assert_eq!(plan.warnings.len(), 1);
    assert_eq!(plan.warnings[0].id, DatapointId(1));
    assert_eq!(plan.warnings[0].declared, ValueKind::Integer);
    assert!(plan.skipped.is_empty());
}

#[test]
fn order_is_kept_and_duplicates_are_not_collapsed() {
    let input = vec![
        dp(5, "https://b.example.com", "//p", ValueKind::Text),
        dp(4, "https://a.example.com", "//p", ValueKind::Text),
        dp(6, "https://b.example.com", "//p", ValueKind::Text),
    ];

    let plan = build_batch(&input);

    let order: Vec<_> = plan.tasks.iter().map(|t| t.correlation).collect();
    assert_eq!(
        order,
        vec![Some(DatapointId(5)), Some(DatapointId(4)), Some(DatapointId(6))]
    );
    assert_eq!(plan.tasks[0].key(), plan.tasks[2].key());
}

#[test]
fn empty_working_set_builds_empty_plan() {
    let plan = build_batch(&[]);
    assert!(plan.is_empty());
    assert!(plan.skipped.is_empty());
}

#[test]
fn selections_never_include_manual() {
    let all = vec![
        dp(1, "u", "x", ValueKind::Text),
        dp(2, "u", "x", ValueKind::Text).with_status(Status::Verify),
        dp(3, "u", "x", ValueKind::Text).with_status(Status::Fix),
        dp(4, "u", "x", ValueKind::Text).with_status(Status::Manual),
        dp(5, "u", "x", ValueKind::Text).with_group("prices"),
        dp(6, "u", "x", ValueKind::Text)
            .with_group("prices")
            .with_status(Status::Fix),
    ];
    let ids = |selection: Selection| -> Vec<u64> {
        select(&all, &selection).iter().map(|d| d.id.0).collect()
    };

    assert_eq!(ids(Selection::Schedulable), vec![1, 2, 3, 5, 6]);
    assert_eq!(ids(Selection::AutoOnly), vec![1, 5]);
    assert_eq!(ids(Selection::Group("prices".to_string())), vec![5]);
    assert_eq!(ids(Selection::One(DatapointId(3))), vec![3]);
    assert_eq!(ids(Selection::One(DatapointId(4))), Vec::<u64>::new());
}

#[test]
fn creation_hook_only_fires_for_auto() {
    let auto = dp(1, "u", "x", ValueKind::Text);
    let manual = dp(2, "u", "x", ValueKind::Text).with_status(Status::Manual);

    assert_eq!(
        on_created(&auto),
        Some(Effect::EnqueueScrape { id: DatapointId(1) })
    );
    assert_eq!(on_created(&manual), None);
}

#[test]
fn datapoint_serializes_with_wire_labels() {
    let point = dp(7, "https://a.example.com", "//h1", ValueKind::Markup).with_status(Status::Fix);
    let json = serde_json::to_value(&point).unwrap();
    assert_eq!(json["status"], "FIX");
    assert_eq!(json["kind"], "HTML");
    assert_eq!(json["id"], 7);

    let back: Datapoint = serde_json::from_value(json).unwrap();
    assert_eq!(back, point);
}
