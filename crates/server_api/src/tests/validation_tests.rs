use super::*;
use shared::error::ErrorCode;

#[test]
fn message_content_bounds() {
    message_content("hi").expect("short");
    message_content(&"a".repeat(MAX_MESSAGE_CHARS)).expect("max");
    let empty = message_content("   ").expect_err("blank");
    assert_eq!(empty.code, ErrorCode::Validation);
    assert_eq!(empty.errors[0].path, "content");
    assert!(message_content(&"a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
}

#[test]
fn length_counts_characters_not_bytes() {
    let accented = "é".repeat(MAX_MESSAGE_CHARS);
    message_content(&accented).expect("multibyte");
}

#[test]
fn collects_every_field_error() {
    let mut validator = Validator::new();
    validator
        .length("title", "", 1, MAX_TITLE_CHARS)
        .email("email", "nobody");
    let status = validator.status("status", "Archived");
    assert!(status.is_none());
    let err = validator.finish().expect_err("invalid");
    let paths: Vec<_> = err.errors.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["title", "email", "status"]);
}

#[test]
fn status_accepts_spaced_names() {
    let mut validator = Validator::new();
    assert_eq!(
        validator.status("status", "In Progress"),
        Some(CaseStatus::InProgress)
    );
    assert_eq!(validator.status("status", "On Hold"), Some(CaseStatus::OnHold));
    validator.finish().expect("valid");
}

#[test]
fn email_shapes() {
    assert!(looks_like_email("a@b.co"));
    assert!(!looks_like_email("a@b"));
    assert!(!looks_like_email("@b.co"));
    assert!(!looks_like_email("a b@c.co"));
}
