use std::collections::HashMap;
use std::sync::Arc;

use super::color;
use super::irc::{parse_badges, parse_emote_ranges, IrcFrame};

/// Snapshot of the merged third-party emote catalog, valid at emission
/// time. Shared by reference; consumers never see later updates.
pub type EmoteMap = Arc<HashMap<String, String>>;

/// Followers-only chat mode. `Disabled` and `Minutes(0)` ("any follower
/// may chat, no minimum follow age") are distinct states and must never
/// be conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowerMode {
    #[default]
    Disabled,
    Minutes(u32),
}

impl FollowerMode {
    /// Parse the ROOMSTATE `followers-only` tag: `-1` disabled, `0` any
    /// follower, `N` minutes of minimum follow age.
    pub fn from_tag(value: &str) -> Option<Self> {
        let n: i64 = value.parse().ok()?;
        if n < 0 {
            Some(FollowerMode::Disabled)
        } else {
            Some(FollowerMode::Minutes(n as u32))
        }
    }
}

/// Room-level chat restrictions, owned by the session. Consumers only
/// ever receive copies inside `ChatEvent::RoomStateUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoomState {
    pub subscribers_only: bool,
    pub emotes_only: bool,
    pub followers_only: FollowerMode,
    pub slow_mode_seconds: u32,
    pub shield_mode_active: bool,
}

impl RoomState {
    /// Merge a ROOMSTATE frame into the current state. Twitch sends
    /// partial frames carrying only the changed tags, so every tag is
    /// optional. Returns whether anything changed.
    pub fn apply_roomstate(&mut self, frame: &IrcFrame) -> bool {
        let before = *self;
        if let Some(v) = frame.tag("subs-only") {
            self.subscribers_only = v == "1";
        }
        if let Some(v) = frame.tag("emote-only") {
            self.emotes_only = v == "1";
        }
        if let Some(v) = frame.tag("followers-only") {
            if let Some(mode) = FollowerMode::from_tag(v) {
                self.followers_only = mode;
            }
        }
        if let Some(v) = frame.tag("slow") {
            self.slow_mode_seconds = v.parse().unwrap_or(0);
        }
        *self != before
    }
}

/// A regular chat message.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub username: String,
    pub display_name: String,
    pub text: String,
    pub color: String,
    pub badges: Vec<String>,
    pub native_emotes: HashMap<String, Vec<(u32, u32)>>,
    pub third_party_emotes: EmoteMap,
    pub timestamp_ms: i64,
    pub message_id: Option<String>,
    pub first_message: bool,
    pub bits: Option<u64>,
}

/// A new subscription announcement.
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub username: String,
    pub display_name: String,
    pub color: String,
    pub badges: Vec<String>,
    pub tier: String,
    pub timestamp_ms: i64,
}

/// A resubscription, optionally with a user-supplied message.
#[derive(Debug, Clone)]
pub struct ResubEvent {
    pub username: String,
    pub display_name: String,
    pub color: String,
    pub badges: Vec<String>,
    pub tier: String,
    pub cumulative_months: u32,
    pub text: String,
    pub native_emotes: HashMap<String, Vec<(u32, u32)>>,
    pub third_party_emotes: EmoteMap,
    pub timestamp_ms: i64,
}

/// A single gifted subscription.
#[derive(Debug, Clone)]
pub struct GiftSubEvent {
    pub username: String,
    pub display_name: String,
    pub color: String,
    pub badges: Vec<String>,
    pub tier: String,
    pub recipient_display_name: String,
    pub timestamp_ms: i64,
}

/// A batch of gifted subscriptions to random chatters.
#[derive(Debug, Clone)]
pub struct MysteryGiftEvent {
    pub username: String,
    pub display_name: String,
    pub color: String,
    pub badges: Vec<String>,
    pub tier: String,
    pub count: u32,
    pub timestamp_ms: i64,
}

/// A single message was deleted by a moderator.
#[derive(Debug, Clone)]
pub struct MessageDeletedEvent {
    pub username: String,
    pub message_id: String,
    pub text: String,
    pub timestamp_ms: i64,
}

/// All of one user's messages were purged (ban or timeout).
#[derive(Debug, Clone)]
pub struct UserPurgedEvent {
    pub username: String,
    /// Timeout length; `None` means a permanent ban.
    pub timeout_seconds: Option<u32>,
    pub timestamp_ms: i64,
}

/// The normalized event stream the session delivers to its consumer,
/// one variant per protocol event kind.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(MessageEvent),
    Subscription(SubscriptionEvent),
    Resub(ResubEvent),
    GiftSub(GiftSubEvent),
    MysteryGift(MysteryGiftEvent),
    MessageDeleted(MessageDeletedEvent),
    UserPurged(UserPurgedEvent),
    ChatCleared { timestamp_ms: i64 },
    RoomStateUpdate(RoomState),
    SystemNotice { text: String, timestamp_ms: i64 },
}

/// Server timestamp of a frame, falling back to local time.
fn timestamp_of(frame: &IrcFrame) -> i64 {
    frame
        .tag("tmi-sent-ts")
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
}

fn sender_identity(frame: &IrcFrame) -> (String, String, String, Vec<String>) {
    let username = frame
        .tag("login")
        .map(str::to_string)
        .or_else(|| frame.sender_nick().map(str::to_string))
        .unwrap_or_default();
    let display_name = frame
        .tag("display-name")
        .map(str::to_string)
        .unwrap_or_else(|| username.clone());
    let color = color::resolve(frame.tag("color"), &username);
    let badges = frame.tag("badges").map(parse_badges).unwrap_or_default();
    (username, display_name, color, badges)
}

/// Normalize one inbound frame into a `ChatEvent`. ROOMSTATE and
/// GLOBALUSERSTATE carry state rather than displayable content and are
/// handled by the session itself; everything unrecognized is dropped.
pub fn normalize(frame: &IrcFrame, emotes: &EmoteMap) -> Option<ChatEvent> {
    match frame.command.as_str() {
        "PRIVMSG" => {
            let (username, display_name, color, badges) = sender_identity(frame);
            Some(ChatEvent::Message(MessageEvent {
                username,
                display_name,
                text: frame.trailing.clone().unwrap_or_default(),
                color,
                badges,
                native_emotes: frame
                    .tag("emotes")
                    .map(parse_emote_ranges)
                    .unwrap_or_default(),
                third_party_emotes: Arc::clone(emotes),
                timestamp_ms: timestamp_of(frame),
                message_id: frame.tag("id").map(str::to_string),
                first_message: frame.tag("first-msg") == Some("1"),
                bits: frame.tag("bits").and_then(|v| v.parse().ok()),
            }))
        }

        "USERNOTICE" => normalize_usernotice(frame, emotes),

        "CLEARMSG" => Some(ChatEvent::MessageDeleted(MessageDeletedEvent {
            username: frame.tag("login").unwrap_or_default().to_string(),
            message_id: frame.tag("target-msg-id").unwrap_or_default().to_string(),
            text: frame.trailing.clone().unwrap_or_default(),
            timestamp_ms: timestamp_of(frame),
        })),

        // CLEARCHAT with a target user is a purge; without one the whole
        // room was cleared.
        "CLEARCHAT" => match frame.trailing.as_deref() {
            Some(target) if !target.is_empty() => Some(ChatEvent::UserPurged(UserPurgedEvent {
                username: target.to_string(),
                timeout_seconds: frame.tag("ban-duration").and_then(|v| v.parse().ok()),
                timestamp_ms: timestamp_of(frame),
            })),
            _ => Some(ChatEvent::ChatCleared {
                timestamp_ms: timestamp_of(frame),
            }),
        },

        "NOTICE" => frame.trailing.as_ref().map(|text| ChatEvent::SystemNotice {
            text: text.clone(),
            timestamp_ms: timestamp_of(frame),
        }),

        _ => None,
    }
}

fn normalize_usernotice(frame: &IrcFrame, emotes: &EmoteMap) -> Option<ChatEvent> {
    let (username, display_name, color, badges) = sender_identity(frame);
    let tier = frame.tag("msg-param-sub-plan").unwrap_or("1000").to_string();
    let timestamp_ms = timestamp_of(frame);

    match frame.tag("msg-id")? {
        "sub" => Some(ChatEvent::Subscription(SubscriptionEvent {
            username,
            display_name,
            color,
            badges,
            tier,
            timestamp_ms,
        })),
        "resub" => Some(ChatEvent::Resub(ResubEvent {
            username,
            display_name,
            color,
            badges,
            tier,
            cumulative_months: frame
                .tag("msg-param-cumulative-months")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            text: frame.trailing.clone().unwrap_or_default(),
            native_emotes: frame
                .tag("emotes")
                .map(parse_emote_ranges)
                .unwrap_or_default(),
            third_party_emotes: Arc::clone(emotes),
            timestamp_ms,
        })),
        "subgift" => Some(ChatEvent::GiftSub(GiftSubEvent {
            username,
            display_name,
            color,
            badges,
            tier,
            recipient_display_name: frame
                .tag("msg-param-recipient-display-name")
                .unwrap_or_default()
                .to_string(),
            timestamp_ms,
        })),
        "submysterygift" => Some(ChatEvent::MysteryGift(MysteryGiftEvent {
            username,
            display_name,
            color,
            badges,
            tier,
            count: frame
                .tag("msg-param-mass-gift-count")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            timestamp_ms,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::irc::parse_line;

    fn empty_emotes() -> EmoteMap {
        Arc::new(HashMap::new())
    }

    #[test]
    fn test_privmsg_normalization() {
        let frame = parse_line(
            "@badges=subscriber/6;color=#1E90FF;display-name=Chatter;emotes=25:0-4;first-msg=1;id=m1;tmi-sent-ts=1700000000000 :chatter!chatter@chatter.tmi.twitch.tv PRIVMSG #chan :Kappa hi",
        )
        .unwrap();
        let Some(ChatEvent::Message(msg)) = normalize(&frame, &empty_emotes()) else {
            panic!("expected a message event");
        };
        assert_eq!(msg.username, "chatter");
        assert_eq!(msg.display_name, "Chatter");
        assert_eq!(msg.color, "#1E90FF");
        assert_eq!(msg.badges, vec!["subscriber/6"]);
        assert_eq!(msg.native_emotes["25"], vec![(0, 4)]);
        assert_eq!(msg.timestamp_ms, 1_700_000_000_000);
        assert_eq!(msg.message_id.as_deref(), Some("m1"));
        assert!(msg.first_message);
        assert_eq!(msg.bits, None);
    }

    #[test]
    fn test_uncolored_user_gets_deterministic_color() {
        let line = ":plain!plain@plain.tmi.twitch.tv PRIVMSG #chan :hello";
        let first = normalize(&parse_line(line).unwrap(), &empty_emotes());
        let second = normalize(&parse_line(line).unwrap(), &empty_emotes());
        let (Some(ChatEvent::Message(a)), Some(ChatEvent::Message(b))) = (first, second) else {
            panic!("expected message events");
        };
        assert!(!a.color.is_empty());
        assert_eq!(a.color, b.color);
    }

    #[test]
    fn test_resub_normalization() {
        let frame = parse_line(
            "@msg-id=resub;login=fan;display-name=Fan;msg-param-sub-plan=2000;msg-param-cumulative-months=13 :tmi.twitch.tv USERNOTICE #chan :still here",
        )
        .unwrap();
        let Some(ChatEvent::Resub(resub)) = normalize(&frame, &empty_emotes()) else {
            panic!("expected a resub event");
        };
        assert_eq!(resub.username, "fan");
        assert_eq!(resub.tier, "2000");
        assert_eq!(resub.cumulative_months, 13);
        assert_eq!(resub.text, "still here");
    }

    #[test]
    fn test_mystery_gift_count() {
        let frame = parse_line(
            "@msg-id=submysterygift;login=gifter;msg-param-mass-gift-count=5;msg-param-sub-plan=1000 :tmi.twitch.tv USERNOTICE #chan",
        )
        .unwrap();
        let Some(ChatEvent::MysteryGift(gift)) = normalize(&frame, &empty_emotes()) else {
            panic!("expected a mystery gift event");
        };
        assert_eq!(gift.count, 5);
        assert_eq!(gift.username, "gifter");
    }

    #[test]
    fn test_clearchat_variants() {
        let purge = parse_line("@ban-duration=600 :tmi.twitch.tv CLEARCHAT #chan :baduser").unwrap();
        let Some(ChatEvent::UserPurged(purged)) = normalize(&purge, &empty_emotes()) else {
            panic!("expected a purge event");
        };
        assert_eq!(purged.username, "baduser");
        assert_eq!(purged.timeout_seconds, Some(600));

        let ban = parse_line(":tmi.twitch.tv CLEARCHAT #chan :baduser").unwrap();
        let Some(ChatEvent::UserPurged(banned)) = normalize(&ban, &empty_emotes()) else {
            panic!("expected a purge event");
        };
        assert_eq!(banned.timeout_seconds, None);

        let clear = parse_line(":tmi.twitch.tv CLEARCHAT #chan").unwrap();
        assert!(matches!(
            normalize(&clear, &empty_emotes()),
            Some(ChatEvent::ChatCleared { .. })
        ));
    }

    #[test]
    fn test_clearmsg_normalization() {
        let frame =
            parse_line("@login=chatter;target-msg-id=m1 :tmi.twitch.tv CLEARMSG #chan :bad words")
                .unwrap();
        let Some(ChatEvent::MessageDeleted(deleted)) = normalize(&frame, &empty_emotes()) else {
            panic!("expected a deletion event");
        };
        assert_eq!(deleted.message_id, "m1");
        assert_eq!(deleted.username, "chatter");
        assert_eq!(deleted.text, "bad words");
    }

    #[test]
    fn test_roomstate_partial_merge() {
        let mut state = RoomState::default();
        let full = parse_line(
            "@emote-only=0;followers-only=-1;slow=0;subs-only=0 :tmi.twitch.tv ROOMSTATE #chan",
        )
        .unwrap();
        assert!(!state.apply_roomstate(&full));

        let partial = parse_line("@slow=30 :tmi.twitch.tv ROOMSTATE #chan").unwrap();
        assert!(state.apply_roomstate(&partial));
        assert_eq!(state.slow_mode_seconds, 30);
        // Untouched fields survive a partial update.
        assert_eq!(state.followers_only, FollowerMode::Disabled);
    }

    #[test]
    fn test_follower_mode_three_states() {
        assert_eq!(FollowerMode::from_tag("-1"), Some(FollowerMode::Disabled));
        assert_eq!(FollowerMode::from_tag("0"), Some(FollowerMode::Minutes(0)));
        assert_eq!(FollowerMode::from_tag("10"), Some(FollowerMode::Minutes(10)));
        assert_ne!(FollowerMode::Disabled, FollowerMode::Minutes(0));

        let mut state = RoomState::default();
        for tag in ["0", "-1", "10"] {
            let line = format!("@followers-only={} :tmi.twitch.tv ROOMSTATE #chan", tag);
            state.apply_roomstate(&parse_line(&line).unwrap());
        }
        assert_eq!(state.followers_only, FollowerMode::Minutes(10));
    }

    #[test]
    fn test_unknown_command_ignored() {
        let frame = parse_line(":tmi.twitch.tv 366 justinfan123 #chan :End of /NAMES list").unwrap();
        assert!(normalize(&frame, &empty_emotes()).is_none());
    }
}
