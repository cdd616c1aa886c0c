//! Typed wire shapes for the endpoints the pipeline consumes. Responses are
//! parsed once into these structs; downstream code never walks raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaKind {
    Vod,
    Live,
    Photo,
    Post,
    Notice,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Vod => "VOD",
            MediaKind::Live => "LIVE",
            MediaKind::Photo => "PHOTO",
            MediaKind::Post => "POST",
            MediaKind::Notice => "NOTICE",
        }
    }
}

/// One acquirable item, normalized across listing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub id: String,
    pub kind: MediaKind,
    pub community_id: i64,
    pub is_fanclub_only: bool,
    pub published_at: DateTime<Utc>,
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseUrls {
    #[serde(default)]
    pub widevine: Option<String>,
    #[serde(default)]
    pub playready: Option<String>,
    #[serde(default)]
    pub fairplay: Option<String>,
}

/// Everything needed to fetch and decrypt one media. Built from either the
/// VOD `playback_info` payload or the live-replay `playback_area_context`.
#[derive(Debug, Clone, Default)]
pub struct PlaybackContext {
    pub mpd_url: Option<String>,
    pub hls_url: Option<String>,
    pub is_drm: bool,
    pub assertion: String,
    pub license_urls: LicenseUrls,
    pub duration: Option<i64>,
    pub orientation: Option<String>,
    pub image_urls: Vec<String>,
}

impl PlaybackContext {
    /// DRM invariant from the playback contract: a protected stream always
    /// carries an assertion and at least one license URL.
    pub fn is_well_formed(&self) -> bool {
        if !self.is_drm {
            return true;
        }
        let has_license = self.license_urls.widevine.is_some()
            || self.license_urls.playready.is_some()
            || self.license_urls.fairplay.is_some();
        has_license && !self.assertion.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrmLicenseEntry {
    #[serde(default)]
    pub license_url: Option<String>,
    #[serde(default)]
    pub cert_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrmInfo {
    #[serde(default)]
    pub assertion: Option<String>,
    #[serde(default)]
    pub widevine: Option<DrmLicenseEntry>,
    #[serde(default)]
    pub playready: Option<DrmLicenseEntry>,
    #[serde(default)]
    pub fairplay: Option<DrmLicenseEntry>,
}

impl DrmInfo {
    fn license_urls(&self) -> LicenseUrls {
        LicenseUrls {
            widevine: self
                .widevine
                .as_ref()
                .and_then(|entry| entry.license_url.clone()),
            playready: self
                .playready
                .as_ref()
                .and_then(|entry| entry.license_url.clone()),
            fairplay: self
                .fairplay
                .as_ref()
                .and_then(|entry| entry.license_url.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEndpoint {
    #[serde(default)]
    pub playback_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoImage {
    pub image_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VodPayload {
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub orientation: Option<String>,
    #[serde(default)]
    pub is_drm: bool,
    #[serde(default)]
    pub drm_info: Option<DrmInfo>,
    #[serde(default)]
    pub hls: Option<StreamEndpoint>,
    #[serde(default)]
    pub dash: Option<StreamEndpoint>,
    #[serde(default)]
    pub images: Vec<PhotoImage>,
}

/// `data` of the VOD/PHOTO playback_info endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfoData {
    #[serde(default)]
    pub vod: Option<VodPayload>,
    #[serde(default)]
    pub photo: Option<VodPayload>,
}

/// `data` of the live-replay playback_area_context endpoint: the same
/// payload nested under `media.live.replay`.
#[derive(Debug, Clone, Deserialize)]
pub struct LivePlaybackData {
    pub media: LiveMedia,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveMedia {
    #[serde(default)]
    pub live: Option<LiveBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBlock {
    #[serde(default)]
    pub live_status: Option<String>,
    #[serde(default)]
    pub replay: Option<VodPayload>,
}

fn context_from_payload(payload: VodPayload) -> PlaybackContext {
    let drm_info = payload.drm_info.unwrap_or_default();
    PlaybackContext {
        mpd_url: payload.dash.and_then(|endpoint| endpoint.playback_url),
        hls_url: payload.hls.and_then(|endpoint| endpoint.playback_url),
        is_drm: payload.is_drm,
        assertion: drm_info.assertion.clone().unwrap_or_default(),
        license_urls: drm_info.license_urls(),
        duration: payload.duration,
        orientation: payload.orientation,
        image_urls: payload
            .images
            .into_iter()
            .map(|image| image.image_url)
            .collect(),
    }
}

impl PlaybackInfoData {
    pub fn into_context(self) -> Option<PlaybackContext> {
        self.vod.or(self.photo).map(context_from_payload)
    }
}

impl LivePlaybackData {
    pub fn into_context(self) -> Option<PlaybackContext> {
        self.media
            .live
            .and_then(|live| live.replay)
            .map(context_from_payload)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityArtist {
    #[serde(default)]
    pub community_artist_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicMedia {
    #[serde(default)]
    pub media_seq: Option<i64>,
    pub media_id: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub community_id: Option<i64>,
    #[serde(default)]
    pub is_fanclub_only: bool,
}

/// `data` of the public_context endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicContextData {
    pub media: PublicMedia,
    #[serde(default)]
    pub community_artists: Vec<CommunityArtist>,
}

impl PublicContextData {
    pub fn artist_names(&self) -> Vec<String> {
        self.community_artists
            .iter()
            .filter_map(|artist| artist.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedMedia {
    pub media_id: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub community_id: Option<i64>,
    #[serde(default)]
    pub is_fanclub_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaListEntry {
    pub media: ListedMedia,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCursor {
    #[serde(default)]
    pub next: Option<String>,
}

/// One page of the media or live-replay listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaListPage {
    #[serde(default)]
    pub contents: Vec<MediaListEntry>,
    #[serde(default)]
    pub cursor: ListCursor,
    #[serde(default)]
    pub has_next: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityInfo {
    pub community_id: i64,
    pub name: String,
    #[serde(default)]
    pub community_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityListData {
    #[serde(default)]
    pub communities: Vec<CommunityInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanclubMembership {
    #[serde(default)]
    pub fanclub_info: Option<FanclubInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanclubInfo {
    #[serde(default)]
    pub artist_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `data` of the account "my" endpoint, reduced to the subscription probe.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyStateData {
    #[serde(default)]
    pub fanclubs: Vec<FanclubMembership>,
}

impl MyStateData {
    pub fn is_fanclub_member(&self) -> bool {
        !self.fanclubs.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostItem {
    pub post_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardPage {
    #[serde(default)]
    pub contents: Vec<PostItem>,
    #[serde(default)]
    pub cursor: ListCursor,
    #[serde(default)]
    pub has_next: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeItem {
    pub notice_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeListPage {
    #[serde(default)]
    pub contents: Vec<NoticeItem>,
    #[serde(default)]
    pub cursor: ListCursor,
    #[serde(default)]
    pub has_next: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeDetail {
    pub notice_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenData {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeInitData {
    pub authorize_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateData {
    pub authenticate_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIssueData {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_info_maps_to_context() {
        let raw = serde_json::json!({
            "vod": {
                "duration": 1800,
                "orientation": "landscape",
                "isDrm": true,
                "drmInfo": {
                    "assertion": "token-123",
                    "widevine": {"licenseUrl": "https://berriz.drmkeyserver.com/widevine_license"}
                },
                "hls": {"playbackUrl": "https://cdn.example/master.m3u8"},
                "dash": {"playbackUrl": "https://cdn.example/manifest.mpd"}
            }
        });
        let data: PlaybackInfoData = serde_json::from_value(raw).unwrap();
        let context = data.into_context().unwrap();
        assert!(context.is_drm);
        assert!(context.is_well_formed());
        assert_eq!(context.assertion, "token-123");
        assert_eq!(
            context.mpd_url.as_deref(),
            Some("https://cdn.example/manifest.mpd")
        );
        assert_eq!(context.duration, Some(1800));
    }

    #[test]
    fn drm_without_license_is_malformed() {
        let context = PlaybackContext {
            is_drm: true,
            ..PlaybackContext::default()
        };
        assert!(!context.is_well_formed());
    }

    #[test]
    fn live_replay_context_nested_under_media() {
        let raw = serde_json::json!({
            "media": {
                "live": {
                    "liveStatus": "END",
                    "replay": {
                        "duration": 300,
                        "isDrm": false,
                        "hls": {"playbackUrl": "https://cdn.example/replay.m3u8"}
                    }
                }
            }
        });
        let data: LivePlaybackData = serde_json::from_value(raw).unwrap();
        let context = data.into_context().unwrap();
        assert!(!context.is_drm);
        assert_eq!(
            context.hls_url.as_deref(),
            Some("https://cdn.example/replay.m3u8")
        );
    }

    #[test]
    fn media_list_page_parses_cursor() {
        let raw = serde_json::json!({
            "contents": [
                {"media": {"mediaId": "a-1", "mediaType": "VOD", "isFanclubOnly": true}}
            ],
            "cursor": {"next": "cursor-2"},
            "hasNext": true
        });
        let page: MediaListPage = serde_json::from_value(raw).unwrap();
        assert!(page.has_next);
        assert_eq!(page.cursor.next.as_deref(), Some("cursor-2"));
        assert!(page.contents[0].media.is_fanclub_only);
    }
}
