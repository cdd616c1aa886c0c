//! MPEG-DASH MPD parsing: SegmentTemplate + SegmentTimeline expansion into
//! absolute segment URLs, ContentProtection extraction, and track selection.

use tracing::warn;

use super::xml::{parse_document, XmlNode};
use super::{ManifestError, ManifestResult, TrackChoice, TrackPrompt};

const SCHEME_MP4_PROTECTION: &str = "urn:mpeg:dash:mp4protection:2011";
const SCHEME_PLAYREADY: &str = "urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95";
const SCHEME_WIDEVINE: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";

/// One `S` element: start time, duration, repeat count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    pub t: u64,
    pub d: u64,
    pub r: u64,
}

#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub id: String,
    pub bandwidth: u64,
    pub codecs: String,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sampling_rate: Option<u32>,
    pub timescale: u64,
    pub init_url: String,
    pub segment_urls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MpdDrmInfo {
    pub default_kid: Option<String>,
    pub widevine_pssh: Option<String>,
    pub playready_pro: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MpdDocument {
    pub base_url: String,
    pub video_tracks: Vec<MediaTrack>,
    pub audio_tracks: Vec<MediaTrack>,
    pub drm: MpdDrmInfo,
}

/// Selected pair after applying the configured track choices.
#[derive(Debug, Clone, Default)]
pub struct SelectedTracks {
    pub video: Option<MediaTrack>,
    pub audio: Option<MediaTrack>,
}

pub fn parse_mpd(content: &str, mpd_url: &str) -> ManifestResult<MpdDocument> {
    let root = parse_document(content)?;
    let base_url = manifest_base(mpd_url);

    let period = root
        .first_child("Period")
        .ok_or_else(|| ManifestError::Malformed("MPD contains no Period".into()))?;

    let mut video_tracks = Vec::new();
    let mut audio_tracks = Vec::new();
    for adaptation_set in period.children_named("AdaptationSet") {
        let mime_type = adaptation_set.attr("mimeType").unwrap_or_default();
        for representation in adaptation_set.children_named("Representation") {
            match parse_representation(representation, adaptation_set, &base_url) {
                Ok(Some(track)) => {
                    if track.mime_type.starts_with("video") {
                        video_tracks.push(track);
                    } else if track.mime_type.starts_with("audio") {
                        audio_tracks.push(track);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    let id = representation.attr("id").unwrap_or("unknown");
                    warn!(representation = id, mime_type, error = %err, "skipping representation");
                }
            }
        }
    }

    Ok(MpdDocument {
        base_url,
        video_tracks,
        audio_tracks,
        drm: parse_drm_info(&root),
    })
}

fn manifest_base(mpd_url: &str) -> String {
    match mpd_url.rsplit_once('/') {
        Some((head, _)) => format!("{head}/"),
        None => mpd_url.to_string(),
    }
}

fn parse_representation(
    representation: &XmlNode,
    adaptation_set: &XmlNode,
    base_url: &str,
) -> ManifestResult<Option<MediaTrack>> {
    let template = representation
        .first_child("SegmentTemplate")
        .or_else(|| adaptation_set.first_child("SegmentTemplate"));
    let Some(template) = template else {
        return Ok(None);
    };

    let id = required_attr(representation, "id")?;
    let bandwidth: u64 = required_attr(representation, "bandwidth")?
        .parse()
        .map_err(|_| ManifestError::Malformed(format!("bad bandwidth on {id}")))?;
    let codecs = required_attr(representation, "codecs")?.to_string();
    let mime_type = adaptation_set
        .attr("mimeType")
        .or_else(|| representation.attr("mimeType"))
        .unwrap_or_default()
        .to_string();

    let init_template = template
        .attr("initialization")
        .ok_or_else(|| ManifestError::Malformed("SegmentTemplate missing initialization".into()))?;
    let media_template = template
        .attr("media")
        .ok_or_else(|| ManifestError::Malformed("SegmentTemplate missing media".into()))?;

    let spans = parse_timeline(template);
    let init_url = join_url(base_url, &init_template.replace("$RepresentationID$", &id));
    let segment_urls = expand_segments(&id, media_template, &spans, base_url);

    Ok(Some(MediaTrack {
        id: id.to_string(),
        bandwidth,
        codecs,
        mime_type,
        width: int_attr(representation, "width"),
        height: int_attr(representation, "height"),
        sampling_rate: int_attr(representation, "audioSamplingRate"),
        timescale: template
            .attr("timescale")
            .and_then(|value| value.parse().ok())
            .unwrap_or(1),
        init_url,
        segment_urls,
    }))
}

fn parse_timeline(template: &XmlNode) -> Vec<SegmentSpan> {
    let Some(timeline) = template.first_child("SegmentTimeline") else {
        return Vec::new();
    };
    let mut spans = Vec::new();
    // An S without @t continues where the previous span ended.
    let mut next_time = 0u64;
    for s in timeline.children_named("S") {
        let t = s
            .attr("t")
            .and_then(|v| v.parse().ok())
            .unwrap_or(next_time);
        let r = s.attr("r").and_then(|v| v.parse().ok()).unwrap_or(0);
        match s.attr("d").and_then(|v| v.parse().ok()) {
            Some(d) => {
                next_time = t + d * (r + 1);
                spans.push(SegmentSpan { t, d, r });
            }
            None => warn!("skipping S element without duration"),
        }
    }
    spans
}

fn expand_segments(
    rep_id: &str,
    media_template: &str,
    spans: &[SegmentSpan],
    base_url: &str,
) -> Vec<String> {
    let mut urls = Vec::new();
    for span in spans {
        let mut time = span.t;
        for _ in 0..=span.r {
            let path = media_template
                .replace("$RepresentationID$", rep_id)
                .replace("$Time$", &time.to_string());
            urls.push(join_url(base_url, &path));
            time += span.d;
        }
    }
    urls
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    match url::Url::parse(base).and_then(|base| base.join(path)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{base}{path}"),
    }
}

fn parse_drm_info(root: &XmlNode) -> MpdDrmInfo {
    let mut info = MpdDrmInfo::default();
    for protection in root.find_all("ContentProtection") {
        match protection.attr("schemeIdUri").unwrap_or_default() {
            scheme if scheme.eq_ignore_ascii_case(SCHEME_MP4_PROTECTION) => {
                if let Some(kid) = protection.attr("cenc:default_KID") {
                    let kid = kid.trim().replace('-', "");
                    if kid.len() == 32 {
                        info.default_kid = Some(kid);
                    }
                }
            }
            scheme if scheme.eq_ignore_ascii_case(SCHEME_PLAYREADY) => {
                if let Some(pro) = protection.first_child("pro") {
                    if !pro.text.is_empty() {
                        info.playready_pro = Some(pro.text.clone());
                    }
                }
            }
            scheme if scheme.eq_ignore_ascii_case(SCHEME_WIDEVINE) => {
                if let Some(pssh) = protection.first_child("pssh") {
                    let text = pssh.text.trim();
                    if text.len() == 76 && text.ends_with('=') {
                        info.widevine_pssh = Some(text.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    info
}

fn required_attr<'a>(node: &'a XmlNode, name: &str) -> ManifestResult<&'a str> {
    node.attr(name)
        .ok_or_else(|| ManifestError::Malformed(format!("{} missing attribute {name}", node.name)))
}

fn int_attr(node: &XmlNode, name: &str) -> Option<u32> {
    node.attr(name).and_then(|value| value.parse().ok())
}

impl MpdDocument {
    /// Applies the configured choices, prompting through `prompt` on `ask`.
    pub async fn select_tracks(
        &self,
        video_choice: TrackChoice,
        audio_choice: TrackChoice,
        prompt: &dyn TrackPrompt,
    ) -> ManifestResult<SelectedTracks> {
        let video = match video_choice {
            TrackChoice::None => None,
            TrackChoice::Ask => {
                if self.video_tracks.is_empty() {
                    None
                } else {
                    let options: Vec<String> = self
                        .video_tracks
                        .iter()
                        .map(|track| {
                            format!(
                                "{}x{}",
                                track.width.unwrap_or(0),
                                track.height.unwrap_or(0)
                            )
                        })
                        .collect();
                    let index = prompt.choose("Select video resolution:", &options).await;
                    self.video_tracks.get(index).cloned()
                }
            }
            TrackChoice::Exact(height) => Some(select_video_exact(&self.video_tracks, height)?),
        };

        let audio = match audio_choice {
            TrackChoice::None => None,
            TrackChoice::Ask => {
                if self.audio_tracks.is_empty() {
                    None
                } else {
                    let options: Vec<String> = self
                        .audio_tracks
                        .iter()
                        .map(|track| {
                            format!(
                                "{} ({}kbps / {}Hz)",
                                track.id,
                                track.bandwidth / 1000,
                                track.sampling_rate.unwrap_or(0)
                            )
                        })
                        .collect();
                    let index = prompt.choose("Select audio track:", &options).await;
                    self.audio_tracks.get(index).cloned()
                }
            }
            TrackChoice::Exact(kbps) => select_audio_exact(&self.audio_tracks, kbps),
        };

        Ok(SelectedTracks { video, audio })
    }
}

fn select_video_exact(tracks: &[MediaTrack], height: u32) -> ManifestResult<MediaTrack> {
    tracks
        .iter()
        .find(|track| track.height == Some(height) || track.width == Some(height))
        .cloned()
        .ok_or_else(|| ManifestError::NoMatch(format!("{height}p")))
}

/// Audio falls back to the first track on a miss; an absent list yields
/// nothing.
fn select_audio_exact(tracks: &[MediaTrack], kbps: u32) -> Option<MediaTrack> {
    if tracks.is_empty() {
        return None;
    }
    tracks
        .iter()
        .find(|track| (track.bandwidth / 1000) as u32 == kbps)
        .or_else(|| tracks.first())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::LastOptionPrompt;

    const SAMPLE_MPD: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" xmlns:cenc="urn:mpeg:cenc:2013" xmlns:mspr="urn:microsoft:playready">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" cenc:default_KID="11111111-2222-3333-4444-555555555555"/>
      <ContentProtection schemeIdUri="urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed">
        <cenc:pssh>AAAAVHBzc2gAAAAA7e+LqXnWSs6jyCfc1R0h7QAAADQIARIQERERESIiMzNEREVVVVVVVRoBBBB=</cenc:pssh>
      </ContentProtection>
      <ContentProtection schemeIdUri="urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95">
        <mspr:pro>cGxheXJlYWR5LW9iamVjdA==</mspr:pro>
      </ContentProtection>
      <SegmentTemplate timescale="1000" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Time$.m4s">
        <SegmentTimeline>
          <S t="0" d="4000" r="1"/>
          <S d="2000"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="video_1080" bandwidth="5000000" codecs="avc1.640028" width="1920" height="1080"/>
      <Representation id="video_720" bandwidth="3000000" codecs="avc1.64001f" width="1280" height="720"/>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4">
      <SegmentTemplate timescale="48000" initialization="$RepresentationID$/init.m4a" media="$RepresentationID$/$Time$.m4a">
        <SegmentTimeline>
          <S t="0" d="96000" r="2"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="audio_128" bandwidth="128000" codecs="mp4a.40.2" audioSamplingRate="48000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    fn parsed() -> MpdDocument {
        parse_mpd(SAMPLE_MPD, "https://cdn.example/media/stream.mpd").unwrap()
    }

    #[test]
    fn expands_segment_timeline_with_repeats() {
        let doc = parsed();
        let video = &doc.video_tracks[0];
        assert_eq!(video.segment_urls.len(), 3);
        assert_eq!(
            video.segment_urls[0],
            "https://cdn.example/media/video_1080/0.m4s"
        );
        assert_eq!(
            video.segment_urls[1],
            "https://cdn.example/media/video_1080/4000.m4s"
        );
        assert_eq!(
            video.segment_urls[2],
            "https://cdn.example/media/video_1080/8000.m4s"
        );
        assert_eq!(
            video.init_url,
            "https://cdn.example/media/video_1080/init.mp4"
        );
        assert_eq!(video.timescale, 1000);
    }

    #[test]
    fn segment_urls_are_absolute_and_unique() {
        let doc = parsed();
        for track in doc.video_tracks.iter().chain(doc.audio_tracks.iter()) {
            let mut seen = std::collections::HashSet::new();
            for url in &track.segment_urls {
                assert!(url.starts_with("https://"));
                assert!(seen.insert(url.clone()), "duplicate segment url {url}");
            }
        }
    }

    #[test]
    fn extracts_content_protection() {
        let doc = parsed();
        assert_eq!(
            doc.drm.default_kid.as_deref(),
            Some("11111111222233334444555555555555")
        );
        let pssh = doc.drm.widevine_pssh.as_deref().unwrap();
        assert_eq!(pssh.len(), 76);
        assert!(pssh.ends_with('='));
        assert_eq!(
            doc.drm.playready_pro.as_deref(),
            Some("cGxheXJlYWR5LW9iamVjdA==")
        );
    }

    #[tokio::test]
    async fn exact_selection_matches_height_and_bandwidth() {
        let doc = parsed();
        let selected = doc
            .select_tracks(
                TrackChoice::Exact(720),
                TrackChoice::Exact(128),
                &LastOptionPrompt,
            )
            .await
            .unwrap();
        assert_eq!(selected.video.unwrap().id, "video_720");
        assert_eq!(selected.audio.unwrap().id, "audio_128");
    }

    #[tokio::test]
    async fn audio_miss_falls_back_to_first_track() {
        let doc = parsed();
        let selected = doc
            .select_tracks(TrackChoice::None, TrackChoice::Exact(999), &LastOptionPrompt)
            .await
            .unwrap();
        assert!(selected.video.is_none());
        assert_eq!(selected.audio.unwrap().id, "audio_128");
    }

    #[tokio::test]
    async fn missing_video_height_is_an_error() {
        let doc = parsed();
        let result = doc
            .select_tracks(TrackChoice::Exact(480), TrackChoice::None, &LastOptionPrompt)
            .await;
        assert!(matches!(result, Err(ManifestError::NoMatch(_))));
    }
}
