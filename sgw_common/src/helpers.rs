/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a strictly positive integer setting. Zero, negative and unparseable values yield `None`.
pub fn parse_positive_number(value: Option<String>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok()).filter(|v| *v > 0)
}
