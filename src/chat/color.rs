/// Display color used when the authenticated user never received one
/// from the server (Twitch brand purple).
pub const BRAND_COLOR: &str = "#9146FF";

/// Twitch's default username palette. Users who never picked a color get
/// one of these assigned client-side.
const PALETTE: [&str; 15] = [
    "#FF0000", "#0000FF", "#008000", "#B22222", "#FF7F50",
    "#9ACD32", "#FF4500", "#2E8B57", "#DAA520", "#D2691E",
    "#5F9EA0", "#1E90FF", "#FF69B4", "#8A2BE2", "#00FF7F",
];

/// Pick a deterministic display color for a login that has none.
///
/// Same algorithm the official web client uses: first and last byte of
/// the login, summed, modulo the palette size. Pure function of the
/// login, so a given user keeps their color across reconnects and
/// process restarts.
pub fn for_username(username: &str) -> &'static str {
    let bytes = username.as_bytes();
    if bytes.is_empty() {
        return PALETTE[0];
    }
    let n = (bytes[0] as usize + bytes[bytes.len() - 1] as usize) % PALETTE.len();
    PALETTE[n]
}

/// Resolve a color from the wire, falling back to the deterministic
/// palette when the tag is empty or missing.
pub fn resolve(supplied: Option<&str>, username: &str) -> String {
    match supplied {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => for_username(username).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_username_same_color() {
        assert_eq!(for_username("somechatter"), for_username("somechatter"));
        assert_eq!(resolve(None, "somechatter"), resolve(Some(""), "somechatter"));
    }

    #[test]
    fn test_palette_is_fixed_size() {
        assert_eq!(PALETTE.len(), 15);
        // Every login maps into the palette.
        for name in ["a", "xx", "some_very_long_login_name", ""] {
            assert!(PALETTE.contains(&for_username(name)));
        }
    }

    #[test]
    fn test_supplied_color_wins() {
        assert_eq!(resolve(Some("#ABCDEF"), "somechatter"), "#ABCDEF");
    }
}
