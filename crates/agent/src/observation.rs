//! Observation trimming

/// Observation before the first cycle has run anything
pub const INITIAL_OBSERVATION: &str = "Just started. No commands have been executed yet.";

/// Observation for a cycle that produced no log entries
pub const NO_COMMANDS_EXECUTED: &str = "No commands executed.";

/// Join cycle logs with blank lines and keep at most the last `max_chars`
/// characters.
pub fn trim_observation<S: AsRef<str>>(logs: &[S], max_chars: usize) -> String {
    let joined = if logs.is_empty() {
        NO_COMMANDS_EXECUTED.to_string()
    } else {
        logs.iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    tail_chars(&joined, max_chars).to_string()
}

/// Suffix of `text` holding at most `max_chars` characters
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
