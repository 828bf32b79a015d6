//! End-to-end exercise of a transactional write that fails mid-commit and
//! auto-rolls-back, against `MockRemoteClient`.

use std::sync::Arc;

use remote_client::MockRemoteClient;
use sheet_common::{
    config::{
        SnapshotConfig,
        TransactionConfig,
    },
    A1Range,
    DocumentHandle,
    Mutation,
    Scope,
    SheetId,
    ValueInputMode,
};
use sheet_errors::{
    ErrorKind,
    ErrorMetadataAnyhowExt,
};
use snapshot::SnapshotStore;
use transaction::{
    IsolationLevel,
    TransactionManager,
    TransactionState,
};

fn write(range: &str, values: Vec<Vec<serde_json::Value>>) -> Mutation {
    let range = A1Range::parse("Sheet1", range).unwrap();
    Mutation::UpdateValues { range, values, value_input_mode: ValueInputMode::Raw }
}

#[tokio::test]
async fn a_transaction_with_an_invalid_mutation_rolls_back_to_pre_transaction_state() {
    let client = Arc::new(MockRemoteClient::new());
    let doc = DocumentHandle::new("d1");
    client.seed_document(&doc);
    let scope = Scope::for_test();

    let read_range = A1Range::parse("Sheet1", "A1:B3").unwrap();
    let pre_state = client.read_values(&scope, &doc, &read_range, &[]).await.unwrap().values;

    let snapshots = Arc::new(SnapshotStore::new(SnapshotConfig::default(), client.clone()));
    let config = TransactionConfig { auto_snapshot: true, auto_rollback: true, ..TransactionConfig::default() };
    let manager = TransactionManager::new(config, client.clone(), snapshots);

    let tx = manager.begin(&scope, &doc, IsolationLevel::ReadCommitted).await.unwrap();
    assert_eq!(manager.status(&tx).unwrap().state, TransactionState::Pending);

    let a1_a3 = vec![vec![serde_json::json!(1)], vec![serde_json::json!(2)], vec![serde_json::json!(3)]];
    manager.queue(&scope, &tx, write("A1:A3", a1_a3)).await.unwrap();
    assert_eq!(manager.status(&tx).unwrap().state, TransactionState::Queued);

    manager.queue(&scope, &tx, write("B1", vec![vec![serde_json::json!("x")]])).await.unwrap();

    // Deliberately invalid: this sheet id doesn't exist, per
    // `MockRemoteClient`'s fixed "always rejects 99999" behavior.
    manager.queue(&scope, &tx, Mutation::DeleteSheet { sheet_id: SheetId(99999) }).await.unwrap();

    let err = manager.commit(&scope, &tx).await.unwrap_err();

    assert_eq!(manager.status(&tx).unwrap().state, TransactionState::RolledBack);
    assert_eq!(err.kind(), ErrorKind::TransactionFailed);
    let tool_error = err.to_tool_error();
    assert_eq!(tool_error.code, "TRANSACTION_FAILED");
    let rollback_status = tool_error
        .details
        .as_ref()
        .and_then(|d| d.get("rollback"))
        .and_then(|r| r.get("status"))
        .and_then(|s| s.as_str());
    assert_eq!(rollback_status, Some("restored"));

    let post_state = client.read_values(&scope, &doc, &read_range, &[]).await.unwrap().values;
    assert_eq!(post_state, pre_state);
}
