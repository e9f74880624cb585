//! Key and path normalization between the GraphQL wire format and the
//! snake_case records used by this crate.

use std::sync::LazyLock;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

static UPPERCASE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]+)").expect("uppercase run pattern"));
static UNDERSCORE_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_([a-z])").expect("underscore letter pattern"));

/// Rewrites a camelCase key in snake_case.
///
/// Every run of uppercase letters gets a leading underscore before the whole
/// key is lowercased, so `isLigoEvent` becomes `is_ligo_event`. Keys that
/// mix digits into case boundaries are not guaranteed to survive a round
/// trip through [`to_camel_case`].
pub fn to_snake_case(key: &str) -> String {
    UPPERCASE_RUN.replace_all(key, "_${1}").to_lowercase()
}

/// Rewrites a snake_case key in camelCase.
pub fn to_camel_case(key: &str) -> String {
    UNDERSCORE_LETTER
        .replace_all(key, |caps: &Captures| caps[1].to_uppercase())
        .into_owned()
}

/// Applies `func` to every object key of a JSON tree, descending through
/// objects and arrays. Scalars are returned untouched.
pub fn recursively_map_keys<F>(value: Value, func: &F) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, value)| (func(&key), recursively_map_keys(value, func)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| recursively_map_keys(item, func))
                .collect(),
        ),
        other => other,
    }
}

/// Renames keys anywhere in the tree according to `key_map` (`(old, new)`
/// pairs). Keys without an entry are kept.
pub fn rename_keys(value: Value, key_map: &[(&str, &str)]) -> Value {
    recursively_map_keys(value, &|key: &str| rename_key(key, key_map))
}

/// Applies the optional explicit renames, then converts every key to
/// snake_case, or to camelCase when `reverse` is set.
pub fn convert_keys(value: Value, key_map: &[(&str, &str)], reverse: bool) -> Value {
    recursively_map_keys(value, &|key: &str| {
        let renamed = rename_key(key, key_map);
        if reverse {
            to_camel_case(&renamed)
        } else {
            to_snake_case(&renamed)
        }
    })
}

fn rename_key(key: &str, key_map: &[(&str, &str)]) -> String {
    key_map
        .iter()
        .find(|(old, _)| *old == key)
        .map(|(_, new)| new.to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Makes an absolute path relative to its root. Relative paths pass through.
pub fn remove_path_anchor(path: &Utf8Path) -> Utf8PathBuf {
    if !path.has_root() {
        return path.to_path_buf();
    }
    path.components()
        .filter(|component| {
            !matches!(
                component,
                Utf8Component::Prefix(_) | Utf8Component::RootDir
            )
        })
        .collect()
}

/// Keeps only the named components of `path`, dropping any anchor together
/// with `.` and `..`.
pub fn confined(path: &Utf8Path) -> Utf8PathBuf {
    path.components()
        .filter(|component| matches!(component, Utf8Component::Normal(_)))
        .collect()
}
