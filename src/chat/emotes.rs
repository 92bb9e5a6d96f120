use std::collections::HashMap;

use serde::Deserialize;

const FFZ_GLOBAL_URL: &str = "https://api.frankerfacez.com/v1/set/global";
const FFZ_ROOM_URL: &str = "https://api.frankerfacez.com/v1/room";
const BTTV_GLOBAL_URL: &str = "https://api.betterttv.net/3/cached/emotes/global";
const BTTV_CHANNEL_URL: &str = "https://api.betterttv.net/3/cached/users/twitch";
const SEVENTV_GLOBAL_URL: &str = "https://7tv.io/v3/emote-sets/global";
const SEVENTV_CHANNEL_URL: &str = "https://7tv.io/v3/users/twitch";
const BTTV_CDN_URL: &str = "https://cdn.betterttv.net/emote";

/// Merged name -> image-URL catalog for one channel connection, plus the
/// numeric channel id when a provider happened to supply it (FFZ room
/// payloads carry it, which lets anonymous sessions reach the id-keyed
/// providers).
#[derive(Debug, Default)]
pub struct MergedCatalog {
    pub emotes: HashMap<String, String>,
    pub channel_id: Option<String>,
}

/// Make an emote image URL absolute. FFZ and 7TV return protocol-relative
/// URLs; anything that already carries a scheme is left alone.
pub fn normalize_image_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Insert one provider tier into the catalog. Later tiers overwrite
/// earlier ones on name collision, which is what gives channel emotes
/// precedence over global ones and later providers precedence over
/// earlier ones.
fn merge_tier(catalog: &mut HashMap<String, String>, tier: HashMap<String, String>) {
    for (name, url) in tier {
        catalog.insert(name, normalize_image_url(&url));
    }
}

#[derive(Debug, Deserialize)]
struct FfzEmote {
    name: String,
    #[serde(default)]
    urls: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfzSet {
    #[serde(default)]
    emoticons: Vec<FfzEmote>,
}

#[derive(Debug, Deserialize)]
struct FfzRoom {
    twitch_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FfzResponse {
    room: Option<FfzRoom>,
    #[serde(default)]
    sets: HashMap<String, FfzSet>,
}

#[derive(Debug, Deserialize)]
struct BttvEmote {
    id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BttvChannel {
    #[serde(default)]
    channel_emotes: Vec<BttvEmote>,
    #[serde(default)]
    shared_emotes: Vec<BttvEmote>,
}

#[derive(Debug, Deserialize)]
struct SevenTvHost {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmoteData {
    host: SevenTvHost,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmote {
    name: String,
    data: SevenTvEmoteData,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmoteSet {
    #[serde(default)]
    emotes: Vec<SevenTvEmote>,
}

#[derive(Debug, Deserialize)]
struct SevenTvUser {
    emote_set: Option<SevenTvEmoteSet>,
}

fn ffz_tier(resp: &FfzResponse) -> HashMap<String, String> {
    let mut tier = HashMap::new();
    for set in resp.sets.values() {
        for emote in &set.emoticons {
            // Prefer the mid-size render; FFZ does not publish every scale
            // for every emote.
            let url = emote
                .urls
                .get("2")
                .or_else(|| emote.urls.get("1"))
                .or_else(|| emote.urls.values().next());
            if let Some(url) = url {
                tier.insert(emote.name.clone(), url.clone());
            }
        }
    }
    tier
}

fn bttv_tier(emotes: &[BttvEmote]) -> HashMap<String, String> {
    emotes
        .iter()
        .map(|e| (e.code.clone(), format!("{}/{}/2x", BTTV_CDN_URL, e.id)))
        .collect()
}

fn seventv_tier(set: &SevenTvEmoteSet) -> HashMap<String, String> {
    set.emotes
        .iter()
        .map(|e| (e.name.clone(), format!("{}/2x.webp", e.data.host.url)))
        .collect()
}

/// Fetch one provider tier. A 404 is a channel legitimately having no
/// entries for that provider and comes back as `Ok(None)`; every other
/// failure is an `Err` the caller downgrades to an empty contribution.
async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<Option<T>, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    response.json::<T>().await.map(Some).map_err(|e| e.to_string())
}

/// Fetch and merge all three emote catalogs for a channel.
///
/// FFZ is keyed by channel name and always attempted; BTTV and 7TV need
/// the numeric channel id and are skipped when it cannot be resolved. No
/// single provider failure aborts the others; the merged result is simply
/// missing that provider's contribution.
pub async fn fetch_all(
    client: &reqwest::Client,
    channel: &str,
    channel_id: Option<&str>,
) -> MergedCatalog {
    let mut catalog = MergedCatalog {
        channel_id: channel_id.map(str::to_string),
        ..MergedCatalog::default()
    };

    match get_json::<FfzResponse>(client, FFZ_GLOBAL_URL).await {
        Ok(Some(resp)) => merge_tier(&mut catalog.emotes, ffz_tier(&resp)),
        Ok(None) => {}
        Err(e) => log::warn!("FFZ global emote fetch failed: {}", e),
    }
    match get_json::<FfzResponse>(client, &format!("{}/{}", FFZ_ROOM_URL, channel)).await {
        Ok(Some(resp)) => {
            if catalog.channel_id.is_none() {
                catalog.channel_id = resp
                    .room
                    .as_ref()
                    .and_then(|r| r.twitch_id)
                    .map(|id| id.to_string());
            }
            merge_tier(&mut catalog.emotes, ffz_tier(&resp));
        }
        Ok(None) => {}
        Err(e) => log::warn!("FFZ channel emote fetch failed for {}: {}", channel, e),
    }

    let Some(id) = catalog.channel_id.clone() else {
        log::debug!("channel id unresolved; skipping BTTV and 7TV for {}", channel);
        return catalog;
    };

    match get_json::<Vec<BttvEmote>>(client, BTTV_GLOBAL_URL).await {
        Ok(Some(emotes)) => merge_tier(&mut catalog.emotes, bttv_tier(&emotes)),
        Ok(None) => {}
        Err(e) => log::warn!("BTTV global emote fetch failed: {}", e),
    }
    match get_json::<BttvChannel>(client, &format!("{}/{}", BTTV_CHANNEL_URL, id)).await {
        Ok(Some(user)) => {
            merge_tier(&mut catalog.emotes, bttv_tier(&user.channel_emotes));
            merge_tier(&mut catalog.emotes, bttv_tier(&user.shared_emotes));
        }
        Ok(None) => {}
        Err(e) => log::warn!("BTTV channel emote fetch failed for {}: {}", channel, e),
    }

    match get_json::<SevenTvEmoteSet>(client, SEVENTV_GLOBAL_URL).await {
        Ok(Some(set)) => merge_tier(&mut catalog.emotes, seventv_tier(&set)),
        Ok(None) => {}
        Err(e) => log::warn!("7TV global emote fetch failed: {}", e),
    }
    match get_json::<SevenTvUser>(client, &format!("{}/{}", SEVENTV_CHANNEL_URL, id)).await {
        Ok(Some(user)) => {
            if let Some(set) = &user.emote_set {
                merge_tier(&mut catalog.emotes, seventv_tier(set));
            }
        }
        Ok(None) => {}
        Err(e) => log::warn!("7TV channel emote fetch failed for {}: {}", channel, e),
    }

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_overrides_global() {
        let mut catalog = HashMap::new();
        merge_tier(
            &mut catalog,
            HashMap::from([("A".to_string(), "https://x/u1".to_string())]),
        );
        merge_tier(
            &mut catalog,
            HashMap::from([
                ("A".to_string(), "https://x/u2".to_string()),
                ("B".to_string(), "https://x/u3".to_string()),
            ]),
        );
        assert_eq!(catalog["A"], "https://x/u2");
        assert_eq!(catalog["B"], "https://x/u3");
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_protocol_relative_url_normalization() {
        assert_eq!(
            normalize_image_url("//cdn.example/x.png"),
            "https://cdn.example/x.png"
        );
        assert_eq!(
            normalize_image_url("https://cdn.example/x.png"),
            "https://cdn.example/x.png"
        );
        assert_eq!(
            normalize_image_url("http://cdn.example/x.png"),
            "http://cdn.example/x.png"
        );
    }

    #[test]
    fn test_ffz_parse_picks_a_url_and_channel_id() {
        let resp: FfzResponse = serde_json::from_value(serde_json::json!({
            "room": { "twitch_id": 123456 },
            "sets": {
                "1": { "emoticons": [
                    { "name": "CatBag", "urls": { "1": "//cdn.frankerfacez.com/emote/25927/1" } }
                ]}
            }
        }))
        .unwrap();
        let tier = ffz_tier(&resp);
        assert_eq!(tier["CatBag"], "//cdn.frankerfacez.com/emote/25927/1");
        assert_eq!(resp.room.unwrap().twitch_id, Some(123456));
    }

    #[test]
    fn test_bttv_parse_builds_cdn_url() {
        let emotes: Vec<BttvEmote> = serde_json::from_value(serde_json::json!([
            { "id": "54fa8f1401e468494b85b537", "code": "FeelsBadMan", "imageType": "png" }
        ]))
        .unwrap();
        let tier = bttv_tier(&emotes);
        assert_eq!(
            tier["FeelsBadMan"],
            "https://cdn.betterttv.net/emote/54fa8f1401e468494b85b537/2x"
        );
    }

    #[test]
    fn test_seventv_parse_appends_scale() {
        let set: SevenTvEmoteSet = serde_json::from_value(serde_json::json!({
            "emotes": [
                { "name": "peepoHappy", "data": { "host": { "url": "//cdn.7tv.app/emote/abc" } } }
            ]
        }))
        .unwrap();
        let tier = seventv_tier(&set);
        assert_eq!(tier["peepoHappy"], "//cdn.7tv.app/emote/abc/2x.webp");

        let mut catalog = HashMap::new();
        merge_tier(&mut catalog, tier);
        assert_eq!(catalog["peepoHappy"], "https://cdn.7tv.app/emote/abc/2x.webp");
    }
}
