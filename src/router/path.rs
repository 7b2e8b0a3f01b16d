use serde_json::{Map, Value};

/// Resolves a dotted path (`data.user.id`) against a JSON value.
///
/// Object segments index by key; array segments index by number. Any
/// miss along the way resolves to `None`.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes a value at a dotted path, creating objects along the way.
///
/// Intermediate values that are not objects are replaced by objects, so
/// the write always lands.
pub fn set(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !matches!(current, Value::Object(_)) {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Renders a `{{dotted.path}}` template against a JSON value.
///
/// String values are inserted bare, other values as their JSON form,
/// and paths that resolve to nothing render as the empty string.
pub fn render_template(template: &str, root: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // unterminated placeholder passes through verbatim
            out.push_str(&rest[start..]);
            return out;
        };
        match get(root, after[..end].trim()) {
            Some(Value::String(s)) => out.push_str(s),
            Some(v) => out.push_str(&v.to_string()),
            None => {}
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_walks_objects_and_arrays() {
        let root = json!({"data": {"items": [{"id": 7}]}, "topic": "a.b"});
        assert_eq!(get(&root, "topic"), Some(&json!("a.b")));
        assert_eq!(get(&root, "data.items.0.id"), Some(&json!(7)));
        assert_eq!(get(&root, "data.items.1"), None);
        assert_eq!(get(&root, "data.missing.deep"), None);
        assert_eq!(get(&root, "topic.beyond"), None);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = json!({});
        set(&mut root, "a.b.c", json!(1));
        assert_eq!(root, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_replaces_non_object_intermediates() {
        let mut root = json!({"a": 5});
        set(&mut root, "a.b", json!(true));
        assert_eq!(root, json!({"a": {"b": true}}));
    }

    #[test]
    fn render_substitutes_paths_and_blanks_misses() {
        let root = json!({"data": {"user": "ada", "n": 3}});
        assert_eq!(
            render_template("user={{data.user}} n={{data.n}} x={{data.x}}", &root),
            "user=ada n=3 x="
        );
    }

    #[test]
    fn render_keeps_unterminated_placeholders() {
        let root = json!({});
        assert_eq!(render_template("broken {{data.x", &root), "broken {{data.x");
    }
}
