//! Plain-text rendering of Atlassian Document Format descriptions

use serde_json::Value;

const BLOCK_NODES: &[&str] = &[
    "paragraph",
    "heading",
    "blockquote",
    "codeBlock",
    "listItem",
    "panel",
    "rule",
    "tableRow",
];

/// Description as plain text; ADF documents are flattened, strings pass through
pub fn description_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => {
            let mut out = String::new();
            flatten(other, &mut out);
            let text = out.trim().to_string();
            (!text.is_empty()).then_some(text)
        }
    }
}

fn flatten(value: &Value, out: &mut String) {
    match value {
        Value::Array(nodes) => nodes.iter().for_each(|node| flatten(node, out)),
        Value::Object(node) => {
            let node_type = node.get("type").and_then(Value::as_str).unwrap_or_default();
            match node_type {
                "text" => {
                    if let Some(text) = node.get("text").and_then(Value::as_str) {
                        out.push_str(text);
                    }
                }
                "hardBreak" => out.push('\n'),
                "mention" | "emoji" | "status" => {
                    let attrs = node.get("attrs");
                    let text = attrs
                        .and_then(|a| a.get("text"))
                        .or_else(|| attrs.and_then(|a| a.get("shortName")))
                        .and_then(Value::as_str);
                    if let Some(text) = text {
                        out.push_str(text);
                    }
                }
                "inlineCard" | "blockCard" => {
                    if let Some(url) = node
                        .get("attrs")
                        .and_then(|a| a.get("url"))
                        .and_then(Value::as_str)
                    {
                        out.push_str(url);
                    }
                }
                _ => {
                    if node_type == "listItem" {
                        out.push_str("- ");
                    }
                    if let Some(content) = node.get("content") {
                        flatten(content, out);
                    }
                    if BLOCK_NODES.contains(&node_type) && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_string_passes_through() {
        assert_eq!(
            description_text(&json!("Already plain")),
            Some("Already plain".to_string())
        );
        assert_eq!(description_text(&Value::Null), None);
    }

    #[test]
    fn test_adf_document_is_flattened() {
        let doc = json!({
            "type": "doc",
            "version": 1,
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "Login fails for "},
                    {"type": "mention", "attrs": {"id": "1", "text": "@Jane"}},
                    {"type": "hardBreak"},
                    {"type": "text", "text": "since Monday."}
                ]},
                {"type": "bulletList", "content": [
                    {"type": "listItem", "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "Chrome"}]}
                    ]},
                    {"type": "listItem", "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "Firefox"}]}
                    ]}
                ]}
            ]
        });

        assert_eq!(
            description_text(&doc).unwrap(),
            "Login fails for @Jane\nsince Monday.\n- Chrome\n- Firefox"
        );
    }

    #[test]
    fn test_empty_document_is_none() {
        assert_eq!(
            description_text(&json!({"type": "doc", "version": 1, "content": []})),
            None
        );
    }
}
