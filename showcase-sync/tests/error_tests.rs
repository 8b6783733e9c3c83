use showcase_sync::SyncError;

#[test]
fn kinds_are_stable() {
    assert_eq!(SyncError::Network("x".into()).kind(), "NetworkError");
    assert_eq!(SyncError::Timeout.kind(), "TimeoutError");
    assert_eq!(SyncError::Stale("x".into()).kind(), "StaleDataError");
    assert_eq!(
        SyncError::RetryExhausted {
            attempts: 3,
            last_error: "x".into()
        }
        .kind(),
        "RetryError"
    );
}

#[test]
fn signature_combines_kind_and_message() {
    let error = SyncError::Network("connection reset".into());
    assert_eq!(error.signature(), "NetworkError_network error: connection reset");
    assert_ne!(
        error.signature(),
        SyncError::Network("connection refused".into()).signature()
    );
}

#[test]
fn transient_classification() {
    assert!(SyncError::Network("reset".into()).is_transient());
    assert!(SyncError::Timeout.is_transient());
    assert!(
        SyncError::Remote {
            status: 429,
            message: String::new()
        }
        .is_transient()
    );
    assert!(
        !SyncError::Remote {
            status: 404,
            message: String::new()
        }
        .is_transient()
    );
    assert!(!SyncError::Auth("expired".into()).is_transient());
    assert!(!SyncError::Validation(vec![]).is_transient());
}

#[test]
fn list_errors_join_messages() {
    let error =
        SyncError::Validation(vec!["Missing title".into(), "Invalid tags structure".into()]);
    assert_eq!(
        error.to_string(),
        "validation failed: Missing title, Invalid tags structure"
    );
}
