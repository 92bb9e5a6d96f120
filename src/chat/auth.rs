/// Fixed application client id sent with every Helix request.
pub const CLIENT_ID: &str = "ao3xnospc6hjvzkz2d5v0d8ohmlr2k";

const AUTHORIZE_URL: &str = "https://id.twitch.tv/oauth2/authorize";

/// Scopes the panel asks for: read/send chat plus the moderation
/// endpoints the session can drive.
const SCOPES: &str = "chat:read chat:edit user:read:email \
moderator:manage:banned_users moderator:manage:chat_messages \
moderator:manage:chat_settings moderator:manage:shield_mode \
moderator:read:shield_mode";

/// Build the implicit-grant sign-in URL the host opens in a browser.
/// The flow returns an access token directly; no refresh token is issued.
pub fn authorize_url(redirect_uri: &str) -> String {
    format!(
        "{}?response_type=token&client_id={}&redirect_uri={}&scope={}",
        AUTHORIZE_URL,
        CLIENT_ID,
        urlencoding::encode(redirect_uri),
        urlencoding::encode(SCOPES)
    )
}
