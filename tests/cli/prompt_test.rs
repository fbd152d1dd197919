//! Tests for permission prompt detection.

use aicli_bridge::cli::{
    contains_approval_response, extract_permission_prompt, is_permission_prompt,
    GENERIC_PERMISSION_PROMPT,
};

#[test]
fn detects_common_prompts() {
    assert!(is_permission_prompt("Overwrite file? (y/n)"));
    assert!(is_permission_prompt("Proceed [Y/N]"));
    assert!(is_permission_prompt("Should I proceed with the migration?"));
    assert!(is_permission_prompt("Do you want to continue?"));
    assert!(!is_permission_prompt("The build finished successfully."));
}

#[test]
fn extracts_question_line() {
    let text = "I will delete the cache.\nDo you want to proceed? (y/n)\n";
    assert_eq!(
        extract_permission_prompt(text),
        "Do you want to proceed? (y/n)"
    );
    assert_eq!(
        extract_permission_prompt("nothing to ask here"),
        GENERIC_PERMISSION_PROMPT
    );
}

#[test]
fn approval_tokens() {
    assert!(contains_approval_response(" Yes\n"));
    assert!(contains_approval_response("OK"));
    assert!(!contains_approval_response("no"));
    assert!(!contains_approval_response("yes, but later"));
}
