use super::*;

#[test]
fn tags_split_on_first_colon() {
    let tags = parse_tags(&[
        "team:payments".to_string(),
        "url:https://example.com".to_string(),
    ]);
    assert_eq!(tags.get("team").map(String::as_str), Some("payments"));
    assert_eq!(
        tags.get("url").map(String::as_str),
        Some("https://example.com")
    );
}

#[test]
fn bare_tag_becomes_key_with_empty_value() {
    let tags = parse_tags(&["customer-facing".to_string()]);
    assert_eq!(tags.get("customer-facing").map(String::as_str), Some(""));
}

#[test]
fn later_duplicate_key_wins() {
    let tags = parse_tags(&["env:staging".to_string(), "env:prod".to_string()]);
    assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
}

#[test]
fn language_prefix_match_wins() {
    let raw = vec!["language:python".to_string(), "runtime:java".to_string()];
    assert_eq!(infer_language(&raw).as_deref(), Some("Python"));
}

#[test]
fn language_prefix_is_case_insensitive() {
    let raw = vec!["LANGUAGE:DOTNET".to_string()];
    assert_eq!(infer_language(&raw).as_deref(), Some(".NET"));
}

#[test]
fn language_falls_back_to_substring_match() {
    let raw = vec!["runtime:nodejs-20".to_string()];
    assert_eq!(infer_language(&raw).as_deref(), Some("Node.js"));
}

#[test]
fn unknown_language_prefix_falls_through_to_substring() {
    // `language:rust` is not in the lexicon; the substring pass does not
    // match it either.
    let raw = vec!["language:rust".to_string()];
    assert_eq!(infer_language(&raw), None);
}

#[test]
fn no_language_signal_yields_none() {
    let raw = vec!["env:prod".to_string(), "team:payments".to_string()];
    assert_eq!(infer_language(&raw), None);
}
