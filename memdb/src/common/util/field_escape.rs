use crate::collection::Document;
use crate::common::{Value, FIELD_SEPARATOR};

const ESCAPE_CHAR: char = '\\';
const FIELD_SEPARATOR_STR: &str = ".";
const ESCAPED_BACKSLASH: &str = concat!('\\', '\\');
const ESCAPED_DOLLAR: &str = concat!('\\', "u0024");
const ESCAPED_DOT: &str = concat!('\\', "u002e");

/// Encodes a field name so it carries no `$` or `.` for the backend.
///
/// `\` becomes `\\`, `$` and `.` become their unicode escape sequences.
pub fn escape_field(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => escaped.push_str(ESCAPED_BACKSLASH),
            '$' => escaped.push_str(ESCAPED_DOLLAR),
            '.' => escaped.push_str(ESCAPED_DOT),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Decodes a field name produced by [escape_field].
///
/// Decoding is a single left-to-right scan, so an escaped backslash is never
/// reinterpreted as the start of another sequence. Unknown sequences are kept
/// as they are.
pub fn unescape_field(field: &str) -> String {
    if !field.contains(ESCAPE_CHAR) {
        return field.to_string();
    }

    let mut unescaped = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find(ESCAPE_CHAR) {
        unescaped.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with(ESCAPED_BACKSLASH) {
            unescaped.push(ESCAPE_CHAR);
            rest = &tail[ESCAPED_BACKSLASH.len()..];
        } else if tail.starts_with(ESCAPED_DOLLAR) {
            unescaped.push('$');
            rest = &tail[ESCAPED_DOLLAR.len()..];
        } else if tail.starts_with(ESCAPED_DOT) {
            unescaped.push('.');
            rest = &tail[ESCAPED_DOT.len()..];
        } else {
            unescaped.push(ESCAPE_CHAR);
            rest = &tail[1..];
        }
    }
    unescaped.push_str(rest);
    unescaped
}

/// Escapes each segment of a dotted path, keeping the separators.
pub fn escape_path(path: &str) -> String {
    path.split(FIELD_SEPARATOR)
        .map(escape_field)
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR_STR)
}

/// Escapes every key of the document, recursing into embedded documents
/// and arrays.
pub fn escape_document(document: &Document) -> Document {
    map_keys(document, &escape_field)
}

/// Reverses [escape_document].
pub fn unescape_document(document: &Document) -> Document {
    map_keys(document, &unescape_field)
}

/// Escapes the keys of any document nested in `value`.
pub fn escape_value(value: &Value) -> Value {
    map_value(value.clone(), &escape_field)
}

fn map_keys(document: &Document, f: &dyn Fn(&str) -> String) -> Document {
    let mut mapped = Document::new();
    for (key, value) in document.iter() {
        mapped.insert_raw(f(&key), map_value(value, f));
    }
    mapped
}

fn map_value(value: Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Document(doc) => Value::Document(map_keys(&doc, f)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| map_value(v, f)).collect()),
        other => other,
    }
}
