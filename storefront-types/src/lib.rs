use itertools::Itertools;

pub mod alert;
pub mod category;
pub mod product;
pub mod review;
pub mod search;
pub mod signal;
pub mod user;

/// Percent-encodes every segment of a path, keeping `/` separators.
///
/// Unreserved characters (`A-Z a-z 0-9 - _ . ~`) are left untouched, so
/// ASCII slugs come out unchanged.
pub fn encode_path<S: AsRef<str>>(path: S) -> String {
    path.as_ref()
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .join("/")
}

/// Brings a request path to the same escaping as [`encode_path`] output.
///
/// Segments that fail to decode as UTF-8 are kept as received.
pub fn normalize_path<S: AsRef<str>>(path: S) -> String {
    path.as_ref()
        .split('/')
        .map(|segment| match urlencoding::decode(segment) {
            Ok(decoded) => urlencoding::encode(&decoded).into_owned(),
            Err(_) => segment.to_string(),
        })
        .join("/")
}

/// Lowercases and joins alphanumeric runs with `-`.
pub fn slugify<S: AsRef<str>>(input: S) -> String {
    let mut out = String::new();
    let mut prev_dash = true;
    for ch in input.as_ref().to_lowercase().chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
