use std::path::PathBuf;

use duewatch::error::{exit_codes, Error, JsonError};

#[test]
fn exit_codes_map_correctly() {
    let user = Error::InvalidArgument("bad".to_string());
    assert_eq!(user.exit_code(), exit_codes::USER_ERROR);

    let missing = Error::TaskNotFound(3);
    assert_eq!(missing.exit_code(), exit_codes::USER_ERROR);

    let sink = Error::SinkFailure("speaker unplugged".to_string());
    assert_eq!(sink.exit_code(), exit_codes::OPERATION_FAILED);

    let lock = Error::LockFailed(PathBuf::from("tasks.json.lock"));
    assert_eq!(lock.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn json_error_includes_code_and_details() {
    let err = Error::MalformedDeadline {
        task_id: 4,
        raw: "friday".to_string(),
    };
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::USER_ERROR);
    assert!(json.error.contains("Malformed deadline"));

    let details = json.details.expect("details");
    assert_eq!(details["task_id"], 4);
    assert_eq!(details["deadline"], "friday");
}

#[test]
fn plain_errors_have_no_details() {
    let err = Error::OperationFailed("boom".to_string());
    assert!(JsonError::from(&err).details.is_none());
}
