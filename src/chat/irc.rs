use std::collections::HashMap;

/// One parsed IRC line as Twitch sends it: optional `@tag=value;...`
/// block, optional `:prefix`, a command, middle params and an optional
/// trailing param.
#[derive(Debug, Clone, Default)]
pub struct IrcFrame {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl IrcFrame {
    /// Look up a tag value; empty tag values count as absent.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Nick part of the prefix (`nick!user@host`).
    pub fn sender_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }

    /// First middle param with any leading `#` stripped.
    pub fn channel(&self) -> Option<&str> {
        self.params.first().map(|p| p.trim_start_matches('#'))
    }
}

/// Parse a single IRC line. Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<IrcFrame> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }

    let mut frame = IrcFrame::default();
    let mut rest = line;

    if let Some(tag_block) = rest.strip_prefix('@') {
        let (tags, remainder) = tag_block.split_once(' ')?;
        for pair in tags.split(';') {
            match pair.split_once('=') {
                Some((k, v)) => frame.tags.insert(k.to_string(), unescape_tag(v)),
                None => frame.tags.insert(pair.to_string(), String::new()),
            };
        }
        rest = remainder.trim_start();
    }

    if let Some(prefixed) = rest.strip_prefix(':') {
        let (prefix, remainder) = prefixed.split_once(' ')?;
        frame.prefix = Some(prefix.to_string());
        rest = remainder.trim_start();
    }

    let (middle, trailing) = match rest.split_once(" :") {
        Some((m, t)) => (m, Some(t.to_string())),
        None => (rest, None),
    };
    frame.trailing = trailing;

    let mut words = middle.split_whitespace();
    frame.command = words.next()?.to_string();
    frame.params = words.map(str::to_string).collect();

    Some(frame)
}

/// Undo IRCv3 tag-value escaping.
fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Parse the `emotes` tag (`id:start-end,start-end/id:start-end`) into a
/// map of emote id to character ranges, exactly as supplied on the wire.
pub fn parse_emote_ranges(tag: &str) -> HashMap<String, Vec<(u32, u32)>> {
    let mut out = HashMap::new();
    for entry in tag.split('/') {
        let Some((id, ranges)) = entry.split_once(':') else {
            continue;
        };
        let mut parsed = Vec::new();
        for range in ranges.split(',') {
            if let Some((start, end)) = range.split_once('-') {
                if let (Ok(s), Ok(e)) = (start.parse(), end.parse()) {
                    parsed.push((s, e));
                }
            }
        }
        if !parsed.is_empty() {
            out.insert(id.to_string(), parsed);
        }
    }
    out
}

/// Parse the `badges` tag (`set/version,set/version`) into ordered badge
/// identifiers.
pub fn parse_badges(tag: &str) -> Vec<String> {
    tag.split(',')
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg() {
        let line = "@badges=broadcaster/1;color=#FF0000;display-name=Some_User;emotes=25:0-4;id=abc-123;tmi-sent-ts=1700000000000 :some_user!some_user@some_user.tmi.twitch.tv PRIVMSG #somechannel :Kappa hello";
        let frame = parse_line(line).unwrap();
        assert_eq!(frame.command, "PRIVMSG");
        assert_eq!(frame.channel(), Some("somechannel"));
        assert_eq!(frame.sender_nick(), Some("some_user"));
        assert_eq!(frame.trailing.as_deref(), Some("Kappa hello"));
        assert_eq!(frame.tag("color"), Some("#FF0000"));
        assert_eq!(frame.tag("id"), Some("abc-123"));
    }

    #[test]
    fn test_parse_without_tags_or_prefix() {
        let frame = parse_line("PING :tmi.twitch.tv").unwrap();
        assert_eq!(frame.command, "PING");
        assert_eq!(frame.trailing.as_deref(), Some("tmi.twitch.tv"));
        assert!(frame.tags.is_empty());
        assert!(frame.prefix.is_none());
    }

    #[test]
    fn test_empty_tag_value_counts_as_absent() {
        let frame = parse_line("@color=;login=x :tmi.twitch.tv CLEARMSG #c :hi").unwrap();
        assert_eq!(frame.tag("color"), None);
        assert_eq!(frame.tag("login"), Some("x"));
    }

    #[test]
    fn test_tag_unescaping() {
        assert_eq!(unescape_tag(r"hi\sthere\:ok\\done"), "hi there;ok\\done");
        let frame =
            parse_line(r"@system-msg=user\ssubscribed! :tmi.twitch.tv USERNOTICE #c").unwrap();
        assert_eq!(frame.tag("system-msg"), Some("user subscribed!"));
    }

    #[test]
    fn test_parse_emote_ranges() {
        let ranges = parse_emote_ranges("25:0-4,12-16/1902:6-10");
        assert_eq!(ranges["25"], vec![(0, 4), (12, 16)]);
        assert_eq!(ranges["1902"], vec![(6, 10)]);
        assert!(parse_emote_ranges("garbage").is_empty());
    }

    #[test]
    fn test_parse_badges() {
        assert_eq!(
            parse_badges("broadcaster/1,subscriber/6"),
            vec!["broadcaster/1".to_string(), "subscriber/6".to_string()]
        );
        assert!(parse_badges("").is_empty());
    }
}
