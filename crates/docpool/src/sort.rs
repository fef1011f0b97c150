//! Sort specifications.

use serde_json::Value;

use crate::operation::Document;

/// Build a sort document from field names.
///
/// A leading `-` sorts that field descending; anything else sorts
/// ascending. Field order is preserved.
///
/// A document holds each key once, so a field named twice collapses to a
/// single entry: it keeps the position of its first mention and the
/// direction of its last.
///
/// ```
/// use docpool::parse_sort;
///
/// let sort = parse_sort(&["-age", "name"]);
/// assert_eq!(sort["age"], -1);
/// assert_eq!(sort["name"], 1);
/// ```
pub fn parse_sort<S: AsRef<str>>(fields: &[S]) -> Document {
    fields
        .iter()
        .map(|field| {
            let field = field.as_ref();
            match field.strip_prefix('-') {
                Some(name) => (name.to_string(), Value::from(-1)),
                None => (field.to_string(), Value::from(1)),
            }
        })
        .collect()
}

/// Turn a sort document back into field names.
///
/// Negative directions become `-field`. Entries whose direction is not a
/// number are skipped.
pub fn format_sort(sort: &Document) -> Vec<String> {
    sort.iter()
        .filter_map(|(name, direction)| {
            let direction = direction.as_f64()?;
            Some(if direction < 0.0 {
                format!("-{name}")
            } else {
                name.clone()
            })
        })
        .collect()
}
