//! Sanitizing of user-controlled strings before they end up in log lines.

/// Replace control characters with `?` and cut the result to `max_len`
/// characters, marking truncation with a trailing `...`.
pub fn sanitize(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_len + 3));
    for (count, c) in input.chars().enumerate() {
        if count == max_len {
            out.push_str("...");
            return out;
        }
        out.push(if c.is_control() { '?' } else { c });
    }
    out
}
