use chat::{ChatEvent, ChatSession, FollowerMode};
use log::{error, info};

pub mod chat;
pub mod config;

/// Render one event as a terminal line. The panel frontend consumes the
/// same stream; this adapter is what `cargo run` gives you.
fn render_event(event: &ChatEvent) {
    match event {
        ChatEvent::Message(msg) => {
            let badges = if msg.badges.is_empty() {
                String::new()
            } else {
                format!("[{}] ", msg.badges.join(","))
            };
            println!("{}{} <{}>: {}", badges, msg.color, msg.display_name, msg.text);
        }
        ChatEvent::Subscription(sub) => {
            println!("* {} subscribed (tier {})", sub.display_name, sub.tier);
        }
        ChatEvent::Resub(resub) => {
            println!(
                "* {} resubscribed for {} months: {}",
                resub.display_name, resub.cumulative_months, resub.text
            );
        }
        ChatEvent::GiftSub(gift) => {
            println!(
                "* {} gifted a sub to {}",
                gift.display_name, gift.recipient_display_name
            );
        }
        ChatEvent::MysteryGift(gift) => {
            println!("* {} is gifting {} subs", gift.display_name, gift.count);
        }
        ChatEvent::MessageDeleted(deleted) => {
            println!("* message from {} deleted: {}", deleted.username, deleted.text);
        }
        ChatEvent::UserPurged(purged) => match purged.timeout_seconds {
            Some(seconds) => println!("* {} timed out for {}s", purged.username, seconds),
            None => println!("* {} banned", purged.username),
        },
        ChatEvent::ChatCleared { .. } => {
            println!("* chat cleared");
        }
        ChatEvent::RoomStateUpdate(state) => {
            let followers = match state.followers_only {
                FollowerMode::Disabled => "off".to_string(),
                FollowerMode::Minutes(0) => "any follower".to_string(),
                FollowerMode::Minutes(m) => format!("{}m followers", m),
            };
            println!(
                "* room: subs-only={} emotes-only={} followers={} slow={}s shield={}",
                state.subscribers_only,
                state.emotes_only,
                followers,
                state.slow_mode_seconds,
                state.shield_mode_active
            );
        }
        ChatEvent::SystemNotice { text, .. } => {
            println!("! {}", text);
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = config::load_config();
    if config.access_token.is_none() {
        info!(
            "No access token configured; running read-only. Sign in at: {}",
            chat::auth::authorize_url("http://localhost:7890/callback")
        );
    }
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(100);
    let mut session = ChatSession::new(event_tx);

    info!("Starting chat panel");
    if let Err(e) = session
        .connect(&config.channel, config.access_token.as_deref())
        .await
    {
        error!("Failed to connect: {}", e);
        return;
    }

    while let Some(event) = event_rx.recv().await {
        render_event(&event);
    }

    session.disconnect().await;
}
