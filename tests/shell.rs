mod common;

use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::doc;
use tokio_test::assert_ok;

use common::{MockCollaborator, controller};
use mongolens::normalizer::RESULT_FIELD;
use mongolens::validator::Severity;
use mongolens::{ExecutionOutcome, QueryStatus};

#[tokio::test]
async fn aggregation_output_becomes_documents() {
    let output = r#"[
  { _id: 'open', count: 12 },
  { _id: 'closed', count: NumberLong(3) }
]"#;
    let mock = Arc::new(MockCollaborator::new().with_script_output(output));
    let controller = controller(mock.clone());
    controller.set_query_text(
        "db.orders.aggregate([{ $group: { _id: '$status', count: { $sum: 1 } } }])",
    );

    let outcome = assert_ok!(controller.execute_query().await);
    assert_eq!(
        outcome,
        ExecutionOutcome::Completed {
            returned: 2,
            total: 2
        }
    );
    assert_eq!(mock.find_calls(), 0);

    let view = controller.snapshot();
    assert_eq!(view.documents[0], doc! { "_id": "open", "count": 12 });
    assert_eq!(view.documents[1], doc! { "_id": "closed", "count": 3_i64 });
    assert!(view.query_time_ms.is_none());
}

#[tokio::test]
async fn scalar_output_is_wrapped() {
    let mock = Arc::new(MockCollaborator::new().with_script_output("42\n"));
    let controller = controller(mock);
    controller.set_query_text("db.orders.countDocuments({})");

    let outcome = assert_ok!(controller.execute_query().await);
    assert!(matches!(outcome, ExecutionOutcome::Completed { returned: 1, .. }));
    assert_eq!(
        controller.snapshot().documents,
        vec![doc! { RESULT_FIELD: "42" }]
    );
}

#[tokio::test]
async fn empty_output_yields_no_documents() {
    let mock = Arc::new(MockCollaborator::new().with_script_output(""));
    let controller = controller(mock);
    controller.set_query_text("db.orders.aggregate([{ $match: { none: true } }])");

    let outcome = assert_ok!(controller.execute_query().await);
    assert_eq!(
        outcome,
        ExecutionOutcome::Completed {
            returned: 0,
            total: 0
        }
    );
}

#[tokio::test]
async fn missing_mongosh_is_reported_plainly() {
    let mock = Arc::new(
        MockCollaborator::new()
            .failing_script("spawn failed")
            .without_mongosh(),
    );
    let controller = controller(mock);
    controller.set_query_text("db.orders.aggregate([])");

    let outcome = assert_ok!(controller.execute_query().await);
    let ExecutionOutcome::Failed(report) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(report.summary.starts_with("mongosh was not found"));
    assert_eq!(controller.status(), QueryStatus::Failed);
}

#[tokio::test]
async fn script_errors_keep_their_message() {
    let mock = Arc::new(MockCollaborator::new().failing_script("MongoServerError: bad stage"));
    let controller = controller(mock);
    controller.set_query_text("db.orders.aggregate([{ $bogus: 1 }])");

    let outcome = assert_ok!(controller.execute_query().await);
    let ExecutionOutcome::Failed(report) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(report.summary, "Script failed: MongoServerError: bad stage");
}

#[tokio::test(start_paused = true)]
async fn editor_diagnostics_follow_the_text() {
    let mock = Arc::new(MockCollaborator::new());
    let controller = controller(mock);
    let mut diagnostics = controller.subscribe_diagnostics();

    controller.set_query_text("{ status: 'open'");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_ok!(diagnostics.changed().await);
    let published = diagnostics.borrow_and_update().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].severity, Severity::Error);
    assert_eq!(published[0].message, "Unclosed '{'");

    controller.set_query_text("{ status: 'open' }");
    assert!(controller.validate_now().is_empty());
}
