use serde_json::Value;
use fcoord::error::{exit_codes, Error};

#[test]
fn exit_code_user_error() {
    let err = Error::InvalidArgument("bad input".to_string());
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);

    let err = Error::AgentNotRegistered("ghost".to_string());
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
}

#[test]
fn exit_code_policy_blocked() {
    let err = Error::CoordinationDenied("/proj/plan.txt".to_string());
    assert_eq!(err.exit_code(), exit_codes::POLICY_BLOCKED);
}

#[test]
fn exit_code_operation_failed() {
    let err = Error::OperationFailed("boom".to_string());
    assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn details_include_lock_denied_fields() {
    let err = Error::LockDenied {
        path: "/proj/plan.txt".to_string(),
        holder: "alice".to_string(),
        kind: "write".to_string(),
    };
    assert_eq!(err.exit_code(), exit_codes::POLICY_BLOCKED);
    let details = err.details().expect("details");
    assert_eq!(details["path"], Value::String("/proj/plan.txt".to_string()));
    assert_eq!(details["holder"], Value::String("alice".to_string()));
    assert_eq!(details["kind"], Value::String("write".to_string()));
}

#[test]
fn invalid_config_details_carry_the_message() {
    let err = Error::InvalidConfig("bad config".to_string());
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    let details = err.details().expect("details");
    assert_eq!(details["message"], Value::String("bad config".to_string()));
}
