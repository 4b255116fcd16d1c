//! JSON-pointer helpers shared by the unused-key report and the secret guard.

use serde_json::Value;

/// Every leaf of `root` with its pointer, in key order. Scalars and empty
/// arrays are leaves; an empty object contributes nothing. A scalar root is
/// reported as "/".
pub(crate) fn leaves(root: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    walk(root, String::new(), &mut out);
    out
}

fn walk<'a>(v: &'a Value, at: String, out: &mut Vec<(String, &'a Value)>) {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                walk(child, format!("{at}/{}", escape(k)), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                walk(child, format!("{at}/{i}"), out);
            }
        }
        _ => {
            let ptr = if at.is_empty() { "/".to_string() } else { at };
            out.push((ptr, v));
        }
    }
}

/// RFC 6901 token escaping.
fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn segments(ptr: &str) -> impl Iterator<Item = &str> {
    ptr.split('/').filter(|s| !s.is_empty())
}

/// Leading "/", no empty segments. The empty pointer normalizes to "/".
pub(crate) fn normalize(ptr: &str) -> String {
    let joined = segments(ptr.trim()).collect::<Vec<_>>().join("/");
    format!("/{joined}")
}

/// True when `leaf` equals `prefix` or lies beneath it, compared segment by
/// segment: "/a/b" covers "/a/b/c" but not "/a/bc". "/" covers everything.
pub(crate) fn covers(prefix: &str, leaf: &str) -> bool {
    let mut rest = segments(leaf);
    segments(prefix).all(|seg| rest.next() == Some(seg))
}
