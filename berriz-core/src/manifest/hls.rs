//! HLS master and media playlist handling on top of m3u8-rs, with the
//! platform's track-selection protocol layered on.

use m3u8_rs::KeyMethod;
use regex::Regex;
use tracing::{info, warn};
use url::Url;

use super::{ManifestError, ManifestResult, TrackChoice, TrackPrompt};

const SEGMENT_EXTENSIONS: [&str; 5] = [".ts", ".aac", ".mp4", ".m4a", ".m4v"];
const FAIRPLAY_KEY_FORMAT: &str = "com.apple.streamingkeydelivery";

#[derive(Debug, Clone)]
pub struct HlsVariant {
    pub uri: String,
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    pub codecs: Option<String>,
    pub audio_group: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HlsAudioTrack {
    pub uri: String,
    pub name: String,
    pub bandwidth_kbps: u32,
}

#[derive(Debug, Clone, Default)]
pub struct HlsMaster {
    pub variants: Vec<HlsVariant>,
    pub audio_tracks: Vec<HlsAudioTrack>,
}

/// Encryption signalled by `#EXT-X-KEY` lines in a media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HlsEncryption {
    Aes128 { key_uri: String },
    /// FairPlay delivery: reported, not decryptable here.
    FairPlay,
}

#[derive(Debug, Clone, Default)]
pub struct HlsMediaPlaylist {
    pub segment_urls: Vec<String>,
    pub encryption: Option<HlsEncryption>,
}

#[derive(Debug, Clone, Default)]
pub struct HlsSelection {
    pub video_playlist_url: Option<String>,
    pub audio_playlist_url: Option<String>,
}

pub fn is_master_playlist(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.trim_start().starts_with("#EXT-X-STREAM-INF:"))
}

pub fn parse_master(content: &str, playlist_url: &str) -> ManifestResult<HlsMaster> {
    let base = Url::parse(playlist_url)?;
    let parsed = m3u8_rs::parse_master_playlist_res(content.as_bytes())
        .map_err(|err| ManifestError::Playlist(format!("{err:?}")))?;

    let mut variants = Vec::new();
    for variant in &parsed.variants {
        let (width, height) = variant
            .resolution
            .map(|res| (res.width as u32, res.height as u32))
            .unwrap_or((0, 0));
        variants.push(HlsVariant {
            uri: resolve(&base, &variant.uri)?,
            bandwidth: variant.bandwidth,
            width,
            height,
            codecs: variant.codecs.clone(),
            audio_group: variant.audio.clone(),
        });
    }
    variants.sort_by_key(|variant| variant.height);

    Ok(HlsMaster {
        variants,
        audio_tracks: parse_audio_tracks(content, &base)?,
    })
}

/// `#EXT-X-MEDIA:TYPE=AUDIO` carries a nonstandard BANDWIDTH attribute on
/// this platform, so the audio group is scraped off the raw lines.
fn parse_audio_tracks(content: &str, base: &Url) -> ManifestResult<Vec<HlsAudioTrack>> {
    let uri_re = Regex::new(r#"URI="([^"]+)""#).expect("static regex");
    let name_re = Regex::new(r#"NAME="([^"]+)""#).expect("static regex");
    let bandwidth_re = Regex::new(r"BANDWIDTH=(\d+)").expect("static regex");

    let mut tracks = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if !line.starts_with("#EXT-X-MEDIA:") || !line.contains("TYPE=AUDIO") {
            continue;
        }
        let Some(uri) = uri_re.captures(line).map(|caps| caps[1].to_string()) else {
            continue;
        };
        let uri = resolve(base, &uri)?;
        let name = name_re
            .captures(line)
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| uri.clone());
        let bandwidth_kbps = bandwidth_re
            .captures(line)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .map(|bps| (bps / 1000) as u32)
            .unwrap_or(0);
        tracks.push(HlsAudioTrack {
            uri,
            name,
            bandwidth_kbps,
        });
    }
    Ok(tracks)
}

pub fn parse_media(content: &str, playlist_url: &str) -> ManifestResult<HlsMediaPlaylist> {
    let base = Url::parse(playlist_url)?;
    let parsed = m3u8_rs::parse_media_playlist_res(content.as_bytes())
        .map_err(|err| ManifestError::Playlist(format!("{err:?}")))?;

    let mut encryption = None;
    let mut segment_urls = Vec::new();
    for segment in &parsed.segments {
        if let Some(key) = &segment.key {
            match &key.method {
                KeyMethod::AES128 => {
                    if let Some(uri) = &key.uri {
                        encryption = Some(HlsEncryption::Aes128 {
                            key_uri: resolve(&base, uri)?,
                        });
                    }
                }
                KeyMethod::SampleAES => {
                    if key.keyformat.as_deref() == Some(FAIRPLAY_KEY_FORMAT) {
                        info!("stream uses FairPlay key delivery");
                        encryption = Some(HlsEncryption::FairPlay);
                    } else {
                        warn!(keyformat = ?key.keyformat, "unsupported SAMPLE-AES key format");
                    }
                }
                KeyMethod::None => {}
                other => warn!(method = ?other, "unsupported encryption method"),
            }
        }
        if has_segment_extension(&segment.uri) {
            segment_urls.push(resolve(&base, &segment.uri)?);
        }
    }

    Ok(HlsMediaPlaylist {
        segment_urls,
        encryption,
    })
}

fn has_segment_extension(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    SEGMENT_EXTENSIONS
        .iter()
        .any(|extension| path.ends_with(extension))
}

fn resolve(base: &Url, uri: &str) -> ManifestResult<String> {
    Ok(base.join(uri)?.to_string())
}

impl HlsMaster {
    pub async fn select(
        &self,
        video_choice: TrackChoice,
        audio_choice: TrackChoice,
        prompt: &dyn TrackPrompt,
    ) -> ManifestResult<HlsSelection> {
        let mut selection = HlsSelection::default();

        match audio_choice {
            TrackChoice::None => {}
            TrackChoice::Ask => {
                if !self.audio_tracks.is_empty() {
                    let options: Vec<String> = self
                        .audio_tracks
                        .iter()
                        .map(|track| format!("{} ({}kbps)", track.name, track.bandwidth_kbps))
                        .collect();
                    let index = prompt.choose("Select audio stream:", &options).await;
                    selection.audio_playlist_url =
                        self.audio_tracks.get(index).map(|track| track.uri.clone());
                }
            }
            TrackChoice::Exact(kbps) => {
                selection.audio_playlist_url = self
                    .audio_tracks
                    .iter()
                    .find(|track| track.bandwidth_kbps == kbps)
                    .or_else(|| self.audio_tracks.first())
                    .map(|track| track.uri.clone());
            }
        }

        match video_choice {
            TrackChoice::None => {}
            TrackChoice::Ask => {
                if !self.variants.is_empty() {
                    let options: Vec<String> = self
                        .variants
                        .iter()
                        .map(|variant| format!("{}x{}", variant.width, variant.height))
                        .collect();
                    let index = prompt.choose("Select video resolution:", &options).await;
                    selection.video_playlist_url =
                        self.variants.get(index).map(|variant| variant.uri.clone());
                }
            }
            TrackChoice::Exact(height) => {
                let variant = self
                    .variants
                    .iter()
                    .find(|variant| variant.height == height || variant.width == height)
                    .ok_or_else(|| ManifestError::NoMatch(format!("{height}p")))?;
                selection.video_playlist_url = Some(variant.uri.clone());
            }
        }

        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::LastOptionPrompt;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"main\",BANDWIDTH=128000,URI=\"audio/128/playlist.m3u8\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1280x720,CODECS=\"avc1.64001f,mp4a.40.2\",AUDIO=\"aud\"\n\
video/720/playlist.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080,CODECS=\"avc1.640028,mp4a.40.2\",AUDIO=\"aud\"\n\
video/1080/playlist.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"keys/k1.key\"\n\
#EXTINF:4.0,\n\
seg/0.ts\n\
#EXTINF:4.0,\n\
seg/1.ts\n\
#EXTINF:2.5,\n\
seg/2.ts\n\
#EXT-X-ENDLIST\n";

    #[test]
    fn master_detection() {
        assert!(is_master_playlist(MASTER));
        assert!(!is_master_playlist(MEDIA));
    }

    #[test]
    fn master_parses_variants_and_audio_group() {
        let master = parse_master(MASTER, "https://cdn.example/hls/master.m3u8").unwrap();
        assert_eq!(master.variants.len(), 2);
        assert_eq!(master.variants[0].height, 720);
        assert_eq!(master.variants[1].height, 1080);
        assert_eq!(
            master.variants[1].uri,
            "https://cdn.example/hls/video/1080/playlist.m3u8"
        );
        assert_eq!(master.audio_tracks.len(), 1);
        assert_eq!(master.audio_tracks[0].bandwidth_kbps, 128);
        assert_eq!(
            master.audio_tracks[0].uri,
            "https://cdn.example/hls/audio/128/playlist.m3u8"
        );
    }

    #[test]
    fn media_collects_absolute_segments_and_key() {
        let playlist = parse_media(MEDIA, "https://cdn.example/hls/video/1080/playlist.m3u8")
            .unwrap();
        assert_eq!(playlist.segment_urls.len(), 3);
        assert_eq!(
            playlist.segment_urls[0],
            "https://cdn.example/hls/video/1080/seg/0.ts"
        );
        assert_eq!(
            playlist.encryption,
            Some(HlsEncryption::Aes128 {
                key_uri: "https://cdn.example/hls/video/1080/keys/k1.key".to_string()
            })
        );
    }

    #[tokio::test]
    async fn exact_selection_picks_height_and_bitrate() {
        let master = parse_master(MASTER, "https://cdn.example/hls/master.m3u8").unwrap();
        let selection = master
            .select(
                TrackChoice::Exact(1080),
                TrackChoice::Exact(128),
                &LastOptionPrompt,
            )
            .await
            .unwrap();
        assert_eq!(
            selection.video_playlist_url.as_deref(),
            Some("https://cdn.example/hls/video/1080/playlist.m3u8")
        );
        assert_eq!(
            selection.audio_playlist_url.as_deref(),
            Some("https://cdn.example/hls/audio/128/playlist.m3u8")
        );
    }

    #[tokio::test]
    async fn audio_bitrate_miss_falls_back_to_first() {
        let master = parse_master(MASTER, "https://cdn.example/hls/master.m3u8").unwrap();
        let selection = master
            .select(TrackChoice::None, TrackChoice::Exact(64), &LastOptionPrompt)
            .await
            .unwrap();
        assert!(selection.video_playlist_url.is_none());
        assert!(selection.audio_playlist_url.is_some());
    }

    #[tokio::test]
    async fn unknown_height_is_an_error() {
        let master = parse_master(MASTER, "https://cdn.example/hls/master.m3u8").unwrap();
        let result = master
            .select(TrackChoice::Exact(480), TrackChoice::None, &LastOptionPrompt)
            .await;
        assert!(matches!(result, Err(ManifestError::NoMatch(_))));
    }
}
