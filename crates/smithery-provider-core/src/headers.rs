/// Ordered header list; names compare case-insensitively.
pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match headers
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
    {
        Some((_, slot)) => *slot = value,
        None => headers.push((name, value)),
    }
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// True when `Content-Type` names `mime`, ignoring parameters and case.
pub fn content_type_is(headers: &Headers, mime: &str) -> bool {
    header_get(headers, "content-type")
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_case_insensitively() {
        let mut headers = Headers::new();
        header_set(&mut headers, "Content-Type", "text/plain");
        header_set(&mut headers, "content-type", "text/html; charset=utf-8");
        assert_eq!(headers.len(), 1);
        assert!(content_type_is(&headers, "TEXT/HTML"));
        assert_eq!(header_get(&headers, "CONTENT-TYPE"), Some("text/html; charset=utf-8"));
    }
}
