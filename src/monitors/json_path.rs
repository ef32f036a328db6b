//! Dotted path queries over JSON documents.
//!
//! Syntax follows the common "gjson style" used in monitor configs:
//! - `a.b.c` walks object keys, `items.0` indexes arrays
//! - `items.#` is the array length, `items.#.name` collects `name` from every element
//! - `*` and `?` glob object keys (first match wins)
//! - `\.` escapes a literal dot in a key
//! - a path starting with `/` is a JSON Pointer (RFC 6901)

use serde_json::Value;

/// Evaluate `path` against `root`. `None` when nothing matches.
pub fn query(root: &Value, path: &str) -> Option<Value> {
    let path = path.trim();
    if path.starts_with('/') {
        return root.pointer(path).cloned();
    }
    if path.is_empty() {
        return None;
    }
    let parts = split_path(path);
    eval(root, &parts)
}

/// String form of a query result: strings unquoted, missing/null as "",
/// everything else as compact JSON.
pub fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn split_path(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '.' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn eval(value: &Value, parts: &[String]) -> Option<Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Array(items) if head == "#" => {
            if rest.is_empty() {
                Some(Value::from(items.len()))
            } else {
                Some(Value::Array(
                    items.iter().filter_map(|item| eval(item, rest)).collect(),
                ))
            }
        }
        Value::Array(items) => head
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .and_then(|item| eval(item, rest)),
        Value::Object(map) => {
            if head.contains(['*', '?']) {
                map.iter()
                    .find(|(key, _)| glob_match(head, key))
                    .and_then(|(_, v)| eval(v, rest))
            } else {
                map.get(head.as_str()).and_then(|v| eval(v, rest))
            }
        }
        _ => None,
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_chars(&pattern, &text)
}

fn glob_match_chars(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|skip| glob_match_chars(rest, &text[skip..])),
        Some(('?', rest)) => !text.is_empty() && glob_match_chars(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match_chars(rest, &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "name": {"first": "Tom", "last": "Anderson"},
            "age": 37,
            "children": ["Sara", "Alex", "Jack"],
            "fav.movie": "Deer Hunter",
            "friends": [
                {"first": "Dale", "age": 44, "active": true},
                {"first": "Roger", "age": 68, "active": false}
            ]
        })
    }

    fn q(path: &str) -> String {
        render(query(&doc(), path).as_ref())
    }

    #[test]
    fn walks_keys_and_indexes() {
        assert_eq!(q("name.last"), "Anderson");
        assert_eq!(q("age"), "37");
        assert_eq!(q("children.1"), "Alex");
        assert_eq!(q("friends.1.first"), "Roger");
        assert_eq!(q("friends.0.active"), "true");
    }

    #[test]
    fn array_length_and_collection() {
        assert_eq!(q("children.#"), "3");
        assert_eq!(q("friends.#.first"), r#"["Dale","Roger"]"#);
    }

    #[test]
    fn wildcards_and_escapes() {
        assert_eq!(q("child*.2"), "Jack");
        assert_eq!(q("c?ildren.0"), "Sara");
        assert_eq!(q(r"fav\.movie"), "Deer Hunter");
    }

    #[test]
    fn json_pointer_paths() {
        assert_eq!(q("/name/first"), "Tom");
        assert_eq!(q("/friends/0/age"), "44");
    }

    #[test]
    fn missing_paths_render_empty() {
        assert_eq!(q("name.middle"), "");
        assert_eq!(q("children.9"), "");
        assert_eq!(q("age.value"), "");
        assert_eq!(q(""), "");
    }

    #[test]
    fn objects_render_as_json() {
        assert_eq!(q("name"), r#"{"first":"Tom","last":"Anderson"}"#);
    }
}
