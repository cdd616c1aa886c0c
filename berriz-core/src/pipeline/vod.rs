//! VOD and live-replay processing: playback resolution, manifest parsing,
//! key acquisition, download, merge, decrypt, mux, rename.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::api::routes;
use crate::api::types::{
    LivePlaybackData, MediaDescriptor, MediaKind, PlaybackContext, PlaybackInfoData,
    PublicContextData,
};
use crate::download::{
    extension_for_mime, SegmentDownloader, TrackDownload, TrackKind,
};
use crate::manifest::hls::{self, HlsEncryption};
use crate::manifest::mpd::{self, SelectedTracks};
use crate::manifest::pssh::extract_pssh;
use crate::manifest::TrackChoice;
use crate::merge::{MergeMode, Merger};
use crate::paths::{expand_template, resolve_collision, sanitize_filename, TemplateValues};
use crate::tools::decrypt::key_string_for;

use super::job::{remove_temp_dir, Job, JobError, JobResult, JobState};
use super::Pipeline;

struct PreparedStreams {
    tracks: Vec<TrackDownload>,
    merge_mode: MergeMode,
    keys: Option<Vec<String>>,
    manifest_body: String,
    manifest_name: &'static str,
}

pub(super) async fn process_video(
    pipeline: &Pipeline,
    descriptor: &MediaDescriptor,
) -> JobResult<PathBuf> {
    let mut job = Job::new(
        descriptor.clone(),
        pipeline.community_name.clone(),
        pipeline.output_root.clone(),
    );
    job.advance(JobState::Fetching);

    let playback = fetch_playback(pipeline, descriptor).await?;
    if !playback.is_well_formed() {
        return Err(JobError::BadPlayback(
            "drm stream without license urls or assertion".into(),
        ));
    }
    let public = fetch_public(pipeline, descriptor).await?;
    job.artist_list = public.artist_names();

    let folder = video_folder(pipeline, descriptor, &job);
    fs::create_dir_all(&folder)
        .await
        .map_err(|source| JobError::Io {
            source,
            path: folder.clone(),
        })?;
    let temp_dir = job.temp_dir(&folder);

    let result = run_stages(
        pipeline,
        descriptor,
        &mut job,
        &playback,
        &public,
        &folder,
        &temp_dir,
    )
    .await;

    match &result {
        Ok(_) => {
            // skip_merge leaves the raw segments behind on purpose.
            if pipeline.flags.clean_dl && !pipeline.flags.skip_merge {
                remove_temp_dir(&temp_dir).await;
            }
        }
        Err(err) if err.is_cancelled() => {
            remove_temp_dir(&temp_dir).await;
        }
        Err(_) => {
            job.advance(JobState::Failed);
            if pipeline.flags.clean_dl {
                remove_temp_dir(&temp_dir).await;
            }
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_stages(
    pipeline: &Pipeline,
    descriptor: &MediaDescriptor,
    job: &mut Job,
    playback: &PlaybackContext,
    public: &PublicContextData,
    folder: &Path,
    temp_dir: &Path,
) -> JobResult<PathBuf> {
    let prepared = prepare_streams(pipeline, playback).await?;

    if !pipeline.flags.no_playlist {
        let path = folder.join(prepared.manifest_name);
        if let Err(err) = fs::write(&path, &prepared.manifest_body).await {
            warn!(path = %path.display(), error = %err, "failed to persist manifest");
        }
    }

    if pipeline.flags.key_only {
        if let Some(keys) = &prepared.keys {
            for key in keys {
                info!(key = %key, "decryption key");
            }
        } else {
            info!("no drm keys for this stream");
        }
        job.advance(JobState::Done);
        return Ok(folder.to_path_buf());
    }
    if pipeline.flags.no_download {
        job.advance(JobState::Done);
        return Ok(folder.to_path_buf());
    }
    if prepared.tracks.is_empty() {
        return Err(JobError::BadPlayback("no tracks selected".into()));
    }

    // Download.
    job.advance(JobState::Downloading);
    let downloader = SegmentDownloader::new(
        &pipeline.config.headers.user_agent,
        temp_dir.to_path_buf(),
        pipeline.segment_semaphore.clone(),
        pipeline.cancel.subscribe(),
    )?;
    for track in &prepared.tracks {
        if pipeline.cancelled() {
            return Err(JobError::Cancelled);
        }
        downloader.download_track(track).await?;
    }

    // Merge. Without it there is nothing downstream to decrypt or mux, so
    // the job ends here with the raw segments left in place.
    let container = pipeline.config.container.effective_container().to_string();
    if pipeline.flags.skip_merge {
        job.advance(JobState::Done);
        return Ok(folder.to_path_buf());
    }
    let mut video_file = None;
    let mut audio_file = None;
    job.advance(JobState::Merging);
    for track in &prepared.tracks {
        let merged = temp_dir.join(format!("{}.{container}", track.kind.as_str()));
        Merger::merge_track_dir(
            &temp_dir.join(track.kind.as_str()),
            &merged,
            prepared.merge_mode,
        )
        .await?;
        match track.kind {
            TrackKind::Video => video_file = Some(merged),
            TrackKind::Audio => audio_file = Some(merged),
        }
    }

    // Decrypt. An absent track needs no decryption.
    if let Some(keys) = &prepared.keys {
        if pipeline.cancelled() {
            return Err(JobError::Cancelled);
        }
        job.advance(JobState::Decrypting);
        let engine = pipeline.config.container.decryption_engine;
        let key_string = key_string_for(keys, engine);
        if let Some(video) = &video_file {
            let decrypted = temp_dir.join(format!("video_decrypted.{container}"));
            let path = pipeline
                .decryptor
                .decrypt(video, &decrypted, &key_string, engine, &container)
                .await?;
            video_file = Some(path);
        }
        if let Some(audio) = &audio_file {
            let decrypted = temp_dir.join(format!("audio_decrypted.{container}"));
            let path = pipeline
                .decryptor
                .decrypt(audio, &decrypted, &key_string, engine, &container)
                .await?;
            audio_file = Some(path);
        }
    }

    // Mux.
    let muxed = temp_dir.join(format!("muxed.{container}"));
    let staged = if pipeline.flags.skip_mux {
        video_file
            .clone()
            .ok_or_else(|| JobError::BadPlayback("no video stream to finalize".into()))?
    } else {
        job.advance(JobState::Muxing);
        let video = video_file
            .as_deref()
            .ok_or_else(|| JobError::BadPlayback("no video stream to mux".into()))?;
        pipeline
            .muxer
            .mux(
                video,
                audio_file.as_deref(),
                &muxed,
                pipeline.config.container.mux,
            )
            .await?;
        muxed
    };

    // Rename into place.
    job.advance(JobState::Renaming);
    let stem = video_file_stem(pipeline, descriptor, job);
    let final_path = resolve_collision(folder, &stem, &container);
    fs::rename(&staged, &final_path)
        .await
        .map_err(|source| JobError::Io {
            source,
            path: final_path.clone(),
        })?;

    save_side_artifacts(pipeline, descriptor, playback, public, folder, &downloader).await;

    job.advance(JobState::Done);
    Ok(final_path)
}

async fn fetch_playback(
    pipeline: &Pipeline,
    descriptor: &MediaDescriptor,
) -> JobResult<PlaybackContext> {
    let params = [("languageCode", "en".to_string())];
    let context = match descriptor.kind {
        MediaKind::Live => {
            let data: LivePlaybackData = pipeline
                .http
                .get(&routes::live_playback_context(&descriptor.id), &params)
                .await?;
            data.into_context()
        }
        _ => {
            let data: PlaybackInfoData = pipeline
                .http
                .get(&routes::playback_info(&descriptor.id), &params)
                .await?;
            data.into_context()
        }
    };
    context.ok_or_else(|| JobError::BadPlayback("playback payload carries no stream".into()))
}

async fn fetch_public(
    pipeline: &Pipeline,
    descriptor: &MediaDescriptor,
) -> JobResult<PublicContextData> {
    let params = [("languageCode", "en".to_string())];
    Ok(pipeline
        .http
        .get(&routes::public_context(&descriptor.id), &params)
        .await?)
}

async fn prepare_streams(
    pipeline: &Pipeline,
    playback: &PlaybackContext,
) -> JobResult<PreparedStreams> {
    let video_choice = TrackChoice::parse(&pipeline.config.stream.video_choice)?;
    let audio_choice = TrackChoice::parse(&pipeline.config.stream.audio_choice)?;

    let prefer_hls = pipeline.flags.hls_only || pipeline.config.stream.prefer_hls;
    let use_hls = playback.hls_url.is_some() && (prefer_hls || playback.mpd_url.is_none());

    if use_hls {
        let hls_url = playback.hls_url.as_deref().expect("checked above");
        prepare_hls(pipeline, hls_url, video_choice, audio_choice).await
    } else {
        let mpd_url = playback
            .mpd_url
            .as_deref()
            .ok_or_else(|| JobError::BadPlayback("no playable stream url".into()))?;
        prepare_dash(pipeline, playback, mpd_url, video_choice, audio_choice).await
    }
}

async fn prepare_dash(
    pipeline: &Pipeline,
    playback: &PlaybackContext,
    mpd_url: &str,
    video_choice: TrackChoice,
    audio_choice: TrackChoice,
) -> JobResult<PreparedStreams> {
    let body = pipeline.http.fetch_manifest(mpd_url).await?;
    let document = mpd::parse_mpd(&body, mpd_url)?;
    let SelectedTracks { video, audio } = document
        .select_tracks(video_choice, audio_choice, pipeline.prompt.as_ref())
        .await?;

    let keys = if playback.is_drm {
        let pssh_set = extract_pssh(&body)?;
        Some(pipeline.resolver.get_keys(playback, &pssh_set).await?)
    } else {
        None
    };

    let mut tracks = Vec::new();
    if let Some(track) = video {
        tracks.push(TrackDownload {
            kind: TrackKind::Video,
            init_url: Some(track.init_url.clone()),
            segment_urls: track.segment_urls.clone(),
            extension: extension_for_mime(&track.mime_type).to_string(),
        });
    }
    if let Some(track) = audio {
        tracks.push(TrackDownload {
            kind: TrackKind::Audio,
            init_url: Some(track.init_url.clone()),
            segment_urls: track.segment_urls.clone(),
            extension: extension_for_mime(&track.mime_type).to_string(),
        });
    }
    Ok(PreparedStreams {
        tracks,
        merge_mode: MergeMode::Dash,
        keys,
        manifest_body: body,
        manifest_name: "manifest.mpd",
    })
}

async fn prepare_hls(
    pipeline: &Pipeline,
    hls_url: &str,
    video_choice: TrackChoice,
    audio_choice: TrackChoice,
) -> JobResult<PreparedStreams> {
    let body = pipeline.http.fetch_manifest(hls_url).await?;

    let mut tracks = Vec::new();
    if hls::is_master_playlist(&body) {
        let master = hls::parse_master(&body, hls_url)?;
        let selection = master
            .select(video_choice, audio_choice, pipeline.prompt.as_ref())
            .await?;
        if let Some(url) = selection.video_playlist_url {
            let playlist_body = pipeline.http.fetch_manifest(&url).await?;
            let playlist = hls::parse_media(&playlist_body, &url)?;
            report_hls_encryption(&playlist.encryption, "video");
            tracks.push(TrackDownload {
                kind: TrackKind::Video,
                init_url: None,
                segment_urls: playlist.segment_urls,
                extension: ".ts".to_string(),
            });
        }
        if let Some(url) = selection.audio_playlist_url {
            let playlist_body = pipeline.http.fetch_manifest(&url).await?;
            let playlist = hls::parse_media(&playlist_body, &url)?;
            report_hls_encryption(&playlist.encryption, "audio");
            tracks.push(TrackDownload {
                kind: TrackKind::Audio,
                init_url: None,
                segment_urls: playlist.segment_urls,
                extension: ".ts".to_string(),
            });
        }
    } else {
        let playlist = hls::parse_media(&body, hls_url)?;
        report_hls_encryption(&playlist.encryption, "video");
        tracks.push(TrackDownload {
            kind: TrackKind::Video,
            init_url: None,
            segment_urls: playlist.segment_urls,
            extension: ".ts".to_string(),
        });
    }

    Ok(PreparedStreams {
        tracks,
        merge_mode: MergeMode::Hls,
        keys: None,
        manifest_body: body,
        manifest_name: "playlist.m3u8",
    })
}

fn report_hls_encryption(encryption: &Option<HlsEncryption>, track: &str) {
    match encryption {
        Some(HlsEncryption::Aes128 { key_uri }) => {
            info!(track, key_uri = %key_uri, "playlist uses AES-128 encryption");
        }
        Some(HlsEncryption::FairPlay) => {
            warn!(track, "FairPlay stream, decryption not supported");
        }
        None => {}
    }
}

fn video_folder(pipeline: &Pipeline, descriptor: &MediaDescriptor, job: &Job) -> PathBuf {
    let root = pipeline
        .output_root
        .join(&pipeline.community_name)
        .join("Videos");
    if pipeline.flags.no_subfolder {
        return root;
    }
    let values = TemplateValues {
        date: pipeline.date_string(
            descriptor.published_at,
            &pipeline.config.download_dir.date_format,
        ),
        community_name: pipeline.community_name.clone(),
        artis: job.artist_list.join(", "),
        title: descriptor.title.clone(),
        tag: pipeline.config.output_template.tag.clone(),
    };
    let folder = expand_template(&pipeline.config.download_dir.dir_name, &values);
    root.join(sanitize_filename(&folder))
}

fn video_file_stem(pipeline: &Pipeline, descriptor: &MediaDescriptor, job: &Job) -> String {
    let values = TemplateValues {
        date: pipeline.date_string(
            descriptor.published_at,
            &pipeline.config.output_template.date_format,
        ),
        community_name: pipeline.community_name.clone(),
        artis: job.artist_list.join(", "),
        title: descriptor.title.clone(),
        tag: pipeline.config.output_template.tag.clone(),
    };
    sanitize_filename(&expand_template(&pipeline.config.output_template.video, &values))
}

/// Thumbnail and playback JSON beside the final container; both best-effort
/// and gated by their flags.
async fn save_side_artifacts(
    pipeline: &Pipeline,
    descriptor: &MediaDescriptor,
    playback: &PlaybackContext,
    public: &PublicContextData,
    folder: &Path,
    downloader: &SegmentDownloader,
) {
    if !pipeline.flags.no_thumbnails {
        if let Some(url) = &public.media.thumbnail_url {
            let path = folder.join(format!(
                "thumbnails_{}.jpg",
                sanitize_filename(&descriptor.title)
            ));
            if let Err(err) = downloader.fetch_one(url, &path, None).await {
                warn!(url = %url, error = %err, "thumbnail download failed");
            }
        }
    }
    if !pipeline.flags.no_json {
        let payload = serde_json::json!({
            "mediaId": descriptor.id,
            "title": descriptor.title,
            "publishedAt": descriptor.published_at.to_rfc3339(),
            "duration": playback.duration,
            "orientation": playback.orientation,
            "isDrm": playback.is_drm,
        });
        let path = folder.join(format!("{}.json", sanitize_filename(&descriptor.title)));
        if let Ok(body) = serde_json::to_vec_pretty(&payload) {
            if let Err(err) = fs::write(&path, body).await {
                warn!(path = %path.display(), error = %err, "failed to write media json");
            }
        }
    }
}
