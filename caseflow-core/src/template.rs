//! Literal `{key}` substitution for notification templates.
//!
//! Deliberately not a templating engine: keys are looked up in the
//! notification's `data` object and replaced with their stringified
//! value; anything unresolved stays in the output verbatim. No
//! expressions, no escaping, no nesting.

use serde_json::Value;

pub fn render(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        // find the closing brace; a '{' without one is literal
        match template[i + 1..].find(|c| c == '{' || c == '}') {
            Some(off) if template[i + 1..].as_bytes()[off] == b'}' => {
                let key = &template[i + 1..i + 1 + off];
                match lookup(data, key) {
                    Some(value) => {
                        out.push_str(&value);
                        // skip past the key and the closing brace
                        for _ in 0..key.chars().count() + 1 {
                            chars.next();
                        }
                    }
                    None => out.push('{'),
                }
            }
            _ => out.push('{'),
        }
    }
    out
}

fn lookup(data: &Value, key: &str) -> Option<String> {
    let value = data.as_object()?.get(key)?;
    Some(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_known_keys() {
        let out = render("Hello {name}", &json!({"name": "Aigerim"}));
        assert_eq!(out, "Hello Aigerim");
    }

    #[test]
    fn unknown_keys_stay_literal() {
        let out = render("Hello {name}", &json!({}));
        assert_eq!(out, "Hello {name}");
    }

    #[test]
    fn mixes_resolved_and_unresolved() {
        let out = render(
            "Case {number}: {old} -> {new}",
            &json!({"number": "APP-1", "new": "approved"}),
        );
        assert_eq!(out, "Case APP-1: {old} -> approved");
    }

    #[test]
    fn non_string_values_are_stringified() {
        let out = render("{count} documents, signed: {done}", &json!({"count": 3, "done": true}));
        assert_eq!(out, "3 documents, signed: true");
    }

    #[test]
    fn stray_braces_are_untouched() {
        let out = render("a { b } c {unclosed", &json!({"b": "x"}));
        assert_eq!(out, "a { b } c {unclosed");
    }
}
