/// Twitch chat integration module
///
/// Everything needed to run one chat panel: an IRC-over-WebSocket
/// transport with automatic reconnection, normalization of the raw
/// protocol into a single `ChatEvent` stream, the merged third-party
/// emote catalog (FFZ, BTTV, 7TV), and the authenticated Helix surface
/// for sending and moderation.
///
/// # Example Usage
///
/// ```rust,no_run
/// use chatpane::chat::{ChatEvent, ChatSession};
/// use tokio::sync::mpsc;
///
/// #[tokio::main]
/// async fn main() {
///     let (tx, mut rx) = mpsc::channel(100);
///     let mut session = ChatSession::new(tx);
///
///     session.connect("some_channel", None).await.unwrap();
///
///     while let Some(event) = rx.recv().await {
///         match event {
///             ChatEvent::Message(msg) => {
///                 println!("{}: {}", msg.display_name, msg.text);
///             }
///             _ => {}
///         }
///     }
/// }
/// ```
mod color;
mod emotes;
mod error;
mod events;
mod helix;
mod irc;
mod session;
mod transport;

pub mod auth;

// Re-export public types
pub use color::BRAND_COLOR;
pub use error::{ChatError, Result};
pub use events::{
    ChatEvent, EmoteMap, FollowerMode, GiftSubEvent, MessageDeletedEvent, MessageEvent,
    MysteryGiftEvent, ResubEvent, RoomState, SubscriptionEvent, UserPurgedEvent,
};
pub use session::{ChatMode, ChatSession, ModAction};
