use berriz_core::manifest::hls;
use berriz_core::manifest::mpd::parse_mpd;
use berriz_core::manifest::pssh::{extract_pssh, is_canonical_widevine};

fn widevine_pssh() -> String {
    let mut pssh = "AAAAVHBzc2gAAAAA7e+LqXnWSs6jyCfc1R0h7QAAADQIARIQERERESIiMzNEREVV".to_string();
    while pssh.len() < 75 {
        pssh.push('A');
    }
    pssh.push('=');
    pssh
}

fn sample_mpd() -> String {
    let pssh = widevine_pssh();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" xmlns:cenc="urn:mpeg:cenc:2013" xmlns:mspr="urn:microsoft:playready">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" cenc:default_KID="01234567-89ab-cdef-0123-456789abcdef"/>
      <ContentProtection schemeIdUri="urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed">
        <cenc:pssh>{pssh}</cenc:pssh>
      </ContentProtection>
      <SegmentTemplate timescale="1000" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Time$.m4s">
        <SegmentTimeline>
          <S t="0" d="4000" r="2"/>
          <S d="3000" r="1"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v1080" bandwidth="5000000" codecs="avc1.640028" width="1920" height="1080"/>
    </AdaptationSet>
  </Period>
</MPD>"#
    )
}

#[test]
fn segment_urls_form_contiguous_unique_absolute_set() {
    let mpd = parse_mpd(&sample_mpd(), "https://cdn.example/v/stream.mpd").unwrap();
    let track = &mpd.video_tracks[0];
    // 3 segments from the first span, 2 from the second.
    assert_eq!(track.segment_urls.len(), 5);
    let times = ["0", "4000", "8000", "12000", "15000"];
    for (url, time) in track.segment_urls.iter().zip(times) {
        assert_eq!(url, &format!("https://cdn.example/v/v1080/{time}.m4s"));
    }
    let unique: std::collections::HashSet<_> = track.segment_urls.iter().collect();
    assert_eq!(unique.len(), track.segment_urls.len());
}

#[test]
fn widevine_pssh_of_length_76_is_extracted_verbatim() {
    let body = sample_mpd();
    let expected = widevine_pssh();

    let mpd = parse_mpd(&body, "https://cdn.example/v/stream.mpd").unwrap();
    assert_eq!(mpd.drm.widevine_pssh.as_deref(), Some(expected.as_str()));
    assert_eq!(
        mpd.drm.default_kid.as_deref(),
        Some("0123456789abcdef0123456789abcdef")
    );

    let set = extract_pssh(&body).unwrap();
    assert_eq!(set.widevine, vec![expected.clone()]);
    assert!(set.playready.is_empty());
    assert!(is_canonical_widevine(&expected));
}

#[test]
fn hls_master_and_media_round_trip() {
    let master_text = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"korean\",BANDWIDTH=128000,URI=\"a/128.m3u8\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080,CODECS=\"avc1.640028\",AUDIO=\"aud\"\n\
v/1080.m3u8\n";
    let master = hls::parse_master(master_text, "https://cdn.example/hls/master.m3u8").unwrap();
    assert_eq!(master.variants.len(), 1);
    assert_eq!(master.variants[0].height, 1080);
    assert_eq!(master.audio_tracks[0].name, "korean");

    let media_text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n\
#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,\nseg1.m4a\n#EXTINF:4.0,\nskip.vtt\n#EXT-X-ENDLIST\n";
    let media = hls::parse_media(media_text, "https://cdn.example/hls/v/1080.m3u8").unwrap();
    // Only recognised segment extensions are collected.
    assert_eq!(
        media.segment_urls,
        vec![
            "https://cdn.example/hls/v/seg0.ts",
            "https://cdn.example/hls/v/seg1.m4a",
        ]
    );
}
