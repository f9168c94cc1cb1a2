//! URL templating and relative resolution

/// Replace `{name}` placeholders using the given lookup
///
/// Placeholders the lookup does not recognize (returns `None`) are kept
/// verbatim, braces included. An unterminated `{` is also kept verbatim.
pub fn substitute_template_parameters<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match after_open.find('}') {
            Some(close) => {
                let name = &after_open[..close];
                match lookup(name) {
                    Some(value) => result.push_str(&value),
                    None => {
                        result.push('{');
                        result.push_str(name);
                        result.push('}');
                    }
                }
                rest = &after_open[close + 1..];
            }
            None => {
                result.push('{');
                rest = after_open;
            }
        }
    }

    result.push_str(rest);
    result
}

/// Resolve a possibly-relative URL against a base URL
///
/// Follows the common cases of RFC 3986 reference resolution: absolute
/// references replace the base, authority-relative (`//host/...`) adopt the
/// base's scheme, root-relative paths replace the base's path, and
/// relative paths resolve against the base's directory.
pub fn resolve(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        return base.to_string();
    }

    if has_scheme(relative) {
        return relative.to_string();
    }

    if let Some(rest) = relative.strip_prefix("//") {
        let scheme = base.split("//").next().unwrap_or("https:");
        return format!("{}//{}", scheme, rest);
    }

    let (origin, path) = split_origin(base);

    if relative.starts_with('/') {
        return format!("{}{}", origin, relative);
    }

    // Strip the base's query/fragment, then its last path segment
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or(path);
    let directory = match path.rfind('/') {
        Some(pos) => &path[..pos + 1],
        None => "/",
    };

    format!("{}{}{}", origin, directory, relative)
}

/// Append a query parameter to a URL
pub fn add_query(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, separator, key, value)
}

fn has_scheme(url: &str) -> bool {
    match url.find(':') {
        Some(pos) => url[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
            && pos > 0,
        None => false,
    }
}

/// Split a URL into (scheme + authority, path-and-after)
fn split_origin(url: &str) -> (&str, &str) {
    let after_scheme = match url.find("://") {
        Some(pos) => pos + 3,
        None => 0,
    };

    match url[after_scheme..].find('/') {
        Some(pos) => url.split_at(after_scheme + pos),
        None => (url, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_lookup(name: &str) -> Option<String> {
        match name {
            "level" | "z" => Some("3".to_string()),
            "x" => Some("5".to_string()),
            "y" => Some("7".to_string()),
            "version" => Some("1.2.0".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_substitute_known_placeholders() {
        let url = substitute_template_parameters("tiles/{level}/{x}/{y}.b3dm", quad_lookup);
        assert_eq!(url, "tiles/3/5/7.b3dm");
    }

    #[test]
    fn test_substitute_z_alias_and_version() {
        let url = substitute_template_parameters("{z}/{x}/{y}.terrain?v={version}", quad_lookup);
        assert_eq!(url, "3/5/7.terrain?v=1.2.0");
    }

    #[test]
    fn test_unknown_placeholder_kept_verbatim() {
        let url = substitute_template_parameters("{x}/{unknown}/{y}", quad_lookup);
        assert_eq!(url, "5/{unknown}/7");
    }

    #[test]
    fn test_unterminated_brace() {
        let url = substitute_template_parameters("{x}/{oops", quad_lookup);
        assert_eq!(url, "5/{oops");
    }

    #[test]
    fn test_resolve_absolute() {
        assert_eq!(
            resolve("https://a.com/x/tileset.json", "https://b.com/other.json"),
            "https://b.com/other.json"
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        assert_eq!(
            resolve("https://a.com/x/tileset.json", "tiles/0.b3dm"),
            "https://a.com/x/tiles/0.b3dm"
        );
    }

    #[test]
    fn test_resolve_root_relative() {
        assert_eq!(
            resolve("https://a.com/x/y/tileset.json", "/other/t.json"),
            "https://a.com/other/t.json"
        );
    }

    #[test]
    fn test_resolve_drops_base_query() {
        assert_eq!(
            resolve("https://a.com/x/tileset.json?token=abc", "0.b3dm"),
            "https://a.com/x/0.b3dm"
        );
    }

    #[test]
    fn test_resolve_base_without_path() {
        assert_eq!(
            resolve("https://a.com", "layer.json"),
            "https://a.com/layer.json"
        );
    }

    #[test]
    fn test_resolve_protocol_relative() {
        assert_eq!(
            resolve("https://a.com/x/tileset.json", "//cdn.com/t.b3dm"),
            "https://cdn.com/t.b3dm"
        );
    }

    #[test]
    fn test_add_query() {
        assert_eq!(add_query("https://a.com/t", "k", "v"), "https://a.com/t?k=v");
        assert_eq!(
            add_query("https://a.com/t?x=1", "k", "v"),
            "https://a.com/t?x=1&k=v"
        );
    }
}
