const HOSTNAME: &str = "HOSTNAME";

const DEFAULT_ORIGIN: &str = "unknown-host";

/// Host name stamped on rows touched by a registry sync
pub fn get_origin() -> String {
    std::env::var(HOSTNAME)
        .ok()
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string())
}

const REGISTRY_TOKEN: &str = "REGISTRY_TOKEN";

pub fn get_registry_token() -> Option<String> {
    std::env::var(REGISTRY_TOKEN).ok()
}

/// Cut `message` down to at most `max_chars` characters
///
/// Operates on char boundaries so multi-byte messages (localized upstream
/// errors) never split a code point.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}
