use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Watchlist usernames are matched case-insensitively and stored lowercase,
/// without a leading `@`.
pub fn normalize_username(username: &str) -> String {
    username.trim().trim_start_matches('@').to_lowercase()
}

/// Escape text for Telegram MarkdownV2. Every reserved character must be
/// escaped or the Bot API rejects the whole message.
pub fn escape_markdown(text: &str) -> String {
    const RESERVED: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("Alice"), "alice");
        assert_eq!(normalize_username("@CryptoWhale"), "cryptowhale");
        assert_eq!(normalize_username("  bob_99 "), "bob_99");
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a.b"), "a\\.b");
        assert_eq!(escape_markdown("no specials"), "no specials");
        assert_eq!(escape_markdown("x_y*z"), "x\\_y\\*z");
        assert_eq!(escape_markdown("(1+1)=2!"), "\\(1\\+1\\)\\=2\\!");
    }
}
