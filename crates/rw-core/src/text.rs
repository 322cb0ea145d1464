/// Truncate `s` to at most `max_bytes` bytes without splitting a UTF-8
/// character, appending `…` when anything was cut.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_pass_through() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
    }

    #[test]
    fn long_strings_are_cut_on_char_boundary() {
        let s = "héllo wörld";
        let out = truncate_utf8(s, 2);
        assert_eq!(out, "h…");
    }
}
