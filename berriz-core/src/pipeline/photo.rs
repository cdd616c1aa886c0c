//! Photo posts: no DRM, no decryption, just a bounded fan-out of image
//! downloads into the community's Images folder.

use std::path::PathBuf;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::fs;
use tracing::info;

use crate::api::routes;
use crate::api::types::{MediaDescriptor, PlaybackInfoData, PublicContextData};
use crate::download::SegmentDownloader;
use crate::paths::sanitize_filename;

use super::job::{Job, JobError, JobResult, JobState};
use super::Pipeline;

pub(super) async fn process_photo(
    pipeline: &Pipeline,
    descriptor: &MediaDescriptor,
) -> JobResult<PathBuf> {
    let mut job = Job::new(
        descriptor.clone(),
        pipeline.community_name.clone(),
        pipeline.output_root.clone(),
    );
    job.advance(JobState::Fetching);

    let params = [("languageCode", "en".to_string())];
    let public: PublicContextData = pipeline
        .http
        .get(&routes::public_context(&descriptor.id), &params)
        .await?;
    let playback: PlaybackInfoData = pipeline
        .http
        .get(&routes::playback_info(&descriptor.id), &params)
        .await?;
    let image_urls = playback
        .into_context()
        .map(|context| context.image_urls)
        .unwrap_or_default();
    if image_urls.is_empty() {
        return Err(JobError::BadPlayback("photo post has no images".into()));
    }

    let folder_name = sanitize_filename(
        public
            .media
            .title
            .as_deref()
            .unwrap_or(descriptor.title.as_str()),
    );
    let folder = pipeline
        .output_root
        .join(&pipeline.community_name)
        .join("Images")
        .join(folder_name);
    fs::create_dir_all(&folder)
        .await
        .map_err(|source| JobError::Io {
            source,
            path: folder.clone(),
        })?;

    job.advance(JobState::Downloading);
    let downloader = SegmentDownloader::new(
        &pipeline.config.headers.user_agent,
        folder.clone(),
        pipeline.photo_semaphore.clone(),
        pipeline.cancel.subscribe(),
    )?;

    let mut tasks = FuturesUnordered::new();
    for (index, url) in image_urls.iter().enumerate() {
        let name = image_file_name(url, index);
        let path = folder.join(name);
        let downloader = &downloader;
        tasks.push(async move {
            let _permit = pipeline
                .photo_semaphore
                .acquire()
                .await
                .map_err(|_| JobError::Cancelled)?;
            downloader
                .fetch_one(url, &path, None)
                .await
                .map_err(JobError::from)
        });
    }
    let total = tasks.len();
    let mut downloaded = 0usize;
    while let Some(result) = tasks.next().await {
        if pipeline.cancelled() {
            return Err(JobError::Cancelled);
        }
        result?;
        downloaded += 1;
    }
    info!(downloaded, total, folder = %folder.display(), "photo job complete");

    job.advance(JobState::Done);
    Ok(folder)
}

/// Last path segment of the image URL, index-prefixed so unnamed images
/// stay unique.
fn image_file_name(url: &str, index: usize) -> String {
    let basename = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("image.jpg");
    sanitize_filename(&format!("{index:03}_{basename}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_names_are_indexed_and_sanitized() {
        assert_eq!(
            image_file_name("https://cdn.example/a/b/photo.jpg?sig=x", 2),
            "002_photo.jpg"
        );
        assert_eq!(image_file_name("https://cdn.example/", 0), "000_image.jpg");
    }
}
