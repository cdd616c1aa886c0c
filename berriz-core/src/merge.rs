//! Chunked async merge of init + media segments into a single file.

use std::io;
use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::download::segment_index;

/// Segments per concurrent chunk task.
const CHUNK_SIZE: usize = 30;
/// Read block while concatenating.
const READ_BLOCK_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("no segment files found in {0}")]
    NoSegments(PathBuf),
    #[error("missing init segment for {0}")]
    MissingInit(PathBuf),
}

pub type MergeResult<T> = Result<T, MergeError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> MergeError + '_ {
    move |source| MergeError::Io {
        source,
        path: path.to_path_buf(),
    }
}

/// DASH merges append after the init bytes; HLS merges start fresh with no
/// init segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Dash,
    Hls,
}

pub struct Merger;

impl Merger {
    /// Collects `seg_*` files from `track_dir`, restores segment order from
    /// the numeric index in the filename, and merges into `output`.
    pub async fn merge_track_dir(
        track_dir: &Path,
        output: &Path,
        mode: MergeMode,
    ) -> MergeResult<()> {
        let mut init_file = None;
        let mut indexed: Vec<(usize, PathBuf)> = Vec::new();

        let mut entries = fs::read_dir(track_dir).await.map_err(io_err(track_dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(track_dir))? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("init_") {
                init_file = Some(path);
            } else if let Some(index) = segment_index(&path) {
                indexed.push((index, path));
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        let segments: Vec<PathBuf> = indexed.into_iter().map(|(_, path)| path).collect();

        if segments.is_empty() {
            return Err(MergeError::NoSegments(track_dir.to_path_buf()));
        }
        if mode == MergeMode::Dash && init_file.is_none() {
            return Err(MergeError::MissingInit(track_dir.to_path_buf()));
        }

        Self::binary_merge(output, init_file.as_deref(), &segments, mode).await
    }

    pub async fn binary_merge(
        output: &Path,
        init_file: Option<&Path>,
        segments: &[PathBuf],
        mode: MergeMode,
    ) -> MergeResult<()> {
        let parent = output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let temp_dir = parent.join("temp_merging");
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(io_err(&temp_dir))?;

        let result = Self::merge_inner(output, init_file, segments, mode, &temp_dir).await;
        if let Err(err) = fs::remove_dir_all(&temp_dir).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %temp_dir.display(), error = %err, "failed to clean merge temp dir");
            }
        }
        result
    }

    async fn merge_inner(
        output: &Path,
        init_file: Option<&Path>,
        segments: &[PathBuf],
        mode: MergeMode,
        temp_dir: &Path,
    ) -> MergeResult<()> {
        if mode == MergeMode::Dash {
            let init = init_file.ok_or_else(|| MergeError::MissingInit(output.to_path_buf()))?;
            let bytes = fs::read(init).await.map_err(io_err(init))?;
            fs::write(output, bytes).await.map_err(io_err(output))?;
        }

        let mut total_bytes = 0u64;
        for segment in segments {
            total_bytes += fs::metadata(segment)
                .await
                .map_err(io_err(segment))?
                .len();
        }
        let progress = merge_progress_bar(total_bytes);

        let chunks: Vec<&[PathBuf]> = segments.chunks(CHUNK_SIZE).collect();
        let chunk_files: Vec<PathBuf> = (0..chunks.len())
            .map(|index| temp_dir.join(format!("chunk_{index}.tmp")))
            .collect();

        let tasks = chunks
            .iter()
            .zip(chunk_files.iter())
            .map(|(chunk, chunk_file)| concat_chunk(chunk, chunk_file, progress.clone()));
        try_join_all(tasks).await?;

        // The output already carries the init bytes for DASH, so chunk
        // files are appended; HLS writes from scratch.
        let mut out = match mode {
            MergeMode::Dash => fs::OpenOptions::new()
                .append(true)
                .open(output)
                .await
                .map_err(io_err(output))?,
            MergeMode::Hls => fs::File::create(output).await.map_err(io_err(output))?,
        };
        for chunk_file in &chunk_files {
            let mut reader = fs::File::open(chunk_file).await.map_err(io_err(chunk_file))?;
            let mut buffer = vec![0u8; READ_BLOCK_BYTES];
            loop {
                let read = reader.read(&mut buffer).await.map_err(io_err(chunk_file))?;
                if read == 0 {
                    break;
                }
                out.write_all(&buffer[..read]).await.map_err(io_err(output))?;
            }
        }
        out.flush().await.map_err(io_err(output))?;
        progress.finish();
        info!(
            output = %output.display(),
            segments = segments.len(),
            "merge complete"
        );
        Ok(())
    }
}

async fn concat_chunk(
    segments: &[PathBuf],
    chunk_file: &Path,
    progress: ProgressBar,
) -> MergeResult<()> {
    let mut out = fs::File::create(chunk_file)
        .await
        .map_err(io_err(chunk_file))?;
    let mut buffer = vec![0u8; READ_BLOCK_BYTES];
    for segment in segments {
        let mut reader = fs::File::open(segment).await.map_err(io_err(segment))?;
        loop {
            let read = reader.read(&mut buffer).await.map_err(io_err(segment))?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])
                .await
                .map_err(io_err(chunk_file))?;
            progress.inc(read as u64);
        }
    }
    out.flush().await.map_err(io_err(chunk_file))?;
    Ok(())
}

fn merge_progress_bar(total_bytes: u64) -> ProgressBar {
    let bar = ProgressBar::new(total_bytes);
    bar.set_style(
        ProgressStyle::with_template("merging [{bar:32}] {bytes}/{total_bytes} {percent}%")
            .expect("static template")
            .progress_chars("=> "),
    );
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn write_track_dir(dir: &Path, with_init: bool, count: usize) {
        fs::create_dir_all(dir).await.unwrap();
        if with_init {
            fs::write(dir.join("init_video_.mp4"), b"INIT").await.unwrap();
        }
        // Written out of order on purpose; the merge restores index order.
        for index in (0..count).rev() {
            fs::write(
                dir.join(format!("seg_video_{index}.mp4")),
                format!("[{index}]"),
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn dash_merge_prepends_init_and_orders_segments() {
        let dir = tempdir().unwrap();
        let track_dir = dir.path().join("video");
        write_track_dir(&track_dir, true, 35).await;
        let output = dir.path().join("video.mp4");

        Merger::merge_track_dir(&track_dir, &output, MergeMode::Dash)
            .await
            .unwrap();

        let merged = fs::read_to_string(&output).await.unwrap();
        let mut expected = String::from("INIT");
        for index in 0..35 {
            expected.push_str(&format!("[{index}]"));
        }
        assert_eq!(merged, expected);
        assert!(!dir.path().join("temp_merging").exists());
    }

    #[tokio::test]
    async fn hls_merge_needs_no_init() {
        let dir = tempdir().unwrap();
        let track_dir = dir.path().join("video");
        write_track_dir(&track_dir, false, 3).await;
        let output = dir.path().join("video.ts");

        Merger::merge_track_dir(&track_dir, &output, MergeMode::Hls)
            .await
            .unwrap();
        let merged = fs::read_to_string(&output).await.unwrap();
        assert_eq!(merged, "[0][1][2]");
    }

    #[tokio::test]
    async fn dash_merge_without_init_fails() {
        let dir = tempdir().unwrap();
        let track_dir = dir.path().join("video");
        write_track_dir(&track_dir, false, 2).await;
        let output = dir.path().join("video.mp4");
        let result = Merger::merge_track_dir(&track_dir, &output, MergeMode::Dash).await;
        assert!(matches!(result, Err(MergeError::MissingInit(_))));
    }

    #[tokio::test]
    async fn empty_track_dir_fails() {
        let dir = tempdir().unwrap();
        let track_dir = dir.path().join("video");
        fs::create_dir_all(&track_dir).await.unwrap();
        let result =
            Merger::merge_track_dir(&track_dir, &dir.path().join("out.mp4"), MergeMode::Hls).await;
        assert!(matches!(result, Err(MergeError::NoSegments(_))));
    }
}
