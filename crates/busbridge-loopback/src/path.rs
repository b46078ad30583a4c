/// Whether `path` is a well-formed object path: `/`, or `/`-separated
/// non-empty elements of ASCII letters, digits and underscores with no
/// trailing slash.
pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|element| {
        !element.is_empty()
            && element
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}
