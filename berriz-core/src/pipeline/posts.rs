//! Board posts and notices: inline image downloads, HTML rendering through
//! the external template seam, and translated JSON persistence.

use std::path::{Path, PathBuf};

use futures::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use tokio::fs;
use tracing::{info, warn};

use crate::api::routes;
use crate::api::types::{NoticeDetail, PostItem};
use crate::download::SegmentDownloader;
use crate::paths::sanitize_filename;

use super::job::{JobError, JobResult};
use super::{Pipeline, RunReport};

/// Languages persisted for translated post bodies.
const TRANSLATION_LANGUAGES: [&str; 4] = ["en", "ko", "ja", "zh"];

pub(super) async fn process_posts(
    pipeline: &Pipeline,
    posts: &[PostItem],
    mut report: RunReport,
) -> RunReport {
    let mut tasks = FuturesUnordered::new();
    for post in posts {
        if pipeline.cancelled() {
            break;
        }
        if pipeline.dedup_active(crate::api::types::MediaKind::Post)
            && pipeline.ledger.exists(&post.post_id)
        {
            info!(id = %post.post_id, "already exists, skip download");
            report.skipped += 1;
            continue;
        }
        tasks.push(async move {
            let _permit = pipeline
                .post_semaphore
                .acquire()
                .await
                .map_err(|_| JobError::Cancelled)?;
            process_one_post(pipeline, post).await
        });
    }
    while let Some(outcome) = tasks.next().await {
        match outcome {
            Ok(_) => report.done += 1,
            Err(err) if err.is_skip() => report.skipped += 1,
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                warn!(error = %err, "post job failed");
                report.failed += 1;
            }
        }
    }
    report
}

async fn process_one_post(pipeline: &Pipeline, post: &PostItem) -> JobResult<PathBuf> {
    let folder = pipeline
        .output_root
        .join(&pipeline.community_name)
        .join("POST")
        .join(sanitize_filename(
            post.title.as_deref().unwrap_or(&post.post_id),
        ));
    fs::create_dir_all(&folder)
        .await
        .map_err(|source| JobError::Io {
            source,
            path: folder.clone(),
        })?;

    download_images(pipeline, &post.image_urls, &folder).await?;

    let translations = fetch_translations(pipeline, &post.post_id).await;
    if !pipeline.flags.no_json {
        let path = folder.join("translations.json");
        if let Ok(body) = serde_json::to_vec_pretty(&translations) {
            fs::write(&path, body).await.map_err(|source| JobError::Io {
                source,
                path: path.clone(),
            })?;
        }
    }

    if !pipeline.flags.no_html {
        let html = pipeline.renderer.render_post(post, &translations);
        if !html.is_empty() {
            let path = folder.join("post.html");
            fs::write(&path, html).await.map_err(|source| JobError::Io {
                source,
                path: path.clone(),
            })?;
        }
    }

    if pipeline.dedup_active(crate::api::types::MediaKind::Post) {
        pipeline.ledger.add(&post.post_id);
    }
    Ok(folder)
}

pub(super) async fn process_notices(
    pipeline: &Pipeline,
    notice_ids: &[i64],
    mut report: RunReport,
) -> RunReport {
    for notice_id in notice_ids {
        if pipeline.cancelled() {
            break;
        }
        let id = notice_id.to_string();
        if pipeline.dedup_active(crate::api::types::MediaKind::Notice)
            && pipeline.ledger.exists(&id)
        {
            info!(id = %id, "already exists, skip download");
            report.skipped += 1;
            continue;
        }
        match process_one_notice(pipeline, *notice_id).await {
            Ok(_) => {
                report.done += 1;
                if pipeline.dedup_active(crate::api::types::MediaKind::Notice) {
                    pipeline.ledger.add(&id);
                }
            }
            Err(err) if err.is_skip() => report.skipped += 1,
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                warn!(error = %err, notice_id, "notice job failed");
                report.failed += 1;
            }
        }
    }
    report
}

async fn process_one_notice(pipeline: &Pipeline, notice_id: i64) -> JobResult<PathBuf> {
    let params = [("languageCode", "en".to_string())];
    let notice: NoticeDetail = pipeline
        .http
        .get(
            &routes::notice_detail(pipeline.community_id, notice_id),
            &params,
        )
        .await?;

    let folder = pipeline
        .output_root
        .join(&pipeline.community_name)
        .join("NOTICE")
        .join(sanitize_filename(
            notice.title.as_deref().unwrap_or(&notice_id.to_string()),
        ));
    fs::create_dir_all(&folder)
        .await
        .map_err(|source| JobError::Io {
            source,
            path: folder.clone(),
        })?;

    let body_images = notice
        .body
        .as_deref()
        .map(extract_body_images)
        .unwrap_or_default();
    download_images(pipeline, &body_images, &folder).await?;

    if !pipeline.flags.no_json {
        let payload = serde_json::json!({
            "noticeId": notice.notice_id,
            "title": notice.title,
            "publishedAt": notice.published_at,
            "body": notice.body,
        });
        let path = folder.join("notice.json");
        if let Ok(body) = serde_json::to_vec_pretty(&payload) {
            fs::write(&path, body).await.map_err(|source| JobError::Io {
                source,
                path: path.clone(),
            })?;
        }
    }

    if !pipeline.flags.no_html {
        let html = pipeline.renderer.render_notice(&notice);
        if !html.is_empty() {
            let path = folder.join("notice.html");
            fs::write(&path, html).await.map_err(|source| JobError::Io {
                source,
                path: path.clone(),
            })?;
        }
    }
    Ok(folder)
}

async fn download_images(
    pipeline: &Pipeline,
    urls: &[String],
    folder: &Path,
) -> JobResult<()> {
    if urls.is_empty() {
        return Ok(());
    }
    let downloader = SegmentDownloader::new(
        &pipeline.config.headers.user_agent,
        folder.to_path_buf(),
        pipeline.photo_semaphore.clone(),
        pipeline.cancel.subscribe(),
    )?;
    for (index, url) in urls.iter().enumerate() {
        if pipeline.cancelled() {
            return Err(JobError::Cancelled);
        }
        let basename = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("image.jpg");
        let path = folder.join(sanitize_filename(&format!("{index:03}_{basename}")));
        downloader.fetch_one(url, &path, None).await?;
    }
    Ok(())
}

/// One translated body per language; failures yield an empty slot so the
/// persisted set always has the same shape.
async fn fetch_translations(pipeline: &Pipeline, post_id: &str) -> Vec<serde_json::Value> {
    let mut translations = Vec::with_capacity(TRANSLATION_LANGUAGES.len());
    for language in TRANSLATION_LANGUAGES {
        let url = format!(
            "{}?languageCode={language}",
            routes::translate_post(post_id)
        );
        match pipeline.http.fetch_translation(&url).await {
            Ok(Some(value)) => translations.push(value),
            Ok(None) => translations.push(serde_json::json!({ "languageCode": language })),
            Err(err) => {
                warn!(error = %err, language, "translation fetch failed");
                translations.push(serde_json::json!({ "languageCode": language }));
            }
        }
    }
    translations
}

fn extract_body_images(body: &str) -> Vec<String> {
    let re = Regex::new(r#"<img[^>]+src="([^"]+)""#).expect("static regex");
    re.captures_iter(body)
        .map(|caps| caps[1].to_string())
        .collect()
}
