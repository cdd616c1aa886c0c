//! Final muxing: ffmpeg stream copy or mkvmerge.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::MuxTool;

use super::{run_tool, CommandExecutor, ToolPaths, ToolResult};

pub struct Muxer {
    tools: ToolPaths,
    executor: Arc<dyn CommandExecutor>,
}

impl Muxer {
    pub fn new(tools: ToolPaths, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { tools, executor }
    }

    pub async fn mux(
        &self,
        video: &Path,
        audio: Option<&Path>,
        output: &Path,
        tool: MuxTool,
    ) -> ToolResult<()> {
        match tool {
            MuxTool::Ffmpeg => {
                info!(output = %output.display(), "muxing with ffmpeg");
                let args = ffmpeg_args(video, audio, output);
                run_tool(&self.executor, &self.tools.ffmpeg, &args).await
            }
            MuxTool::Mkvtoolnix => {
                info!(output = %output.display(), "muxing with mkvmerge");
                let args = mkvmerge_args(video, audio, output);
                run_tool(&self.executor, &self.tools.mkvmerge, &args).await
            }
        }
    }
}

/// Stream-copy remux that strips chapters and global metadata, regenerates
/// timestamps, and keeps the moov layout streamable.
fn ffmpeg_args(video: &Path, audio: Option<&Path>, output: &Path) -> Vec<String> {
    let mut args = vec!["-i".to_string(), video.display().to_string()];
    if let Some(audio) = audio {
        args.push("-i".to_string());
        args.push(audio.display().to_string());
    }
    args.extend(
        [
            "-c",
            "copy",
            "-bsf:a",
            "aac_adtstoasc",
            "-movflags",
            "+faststart+frag_keyframe+empty_moov+default_base_moof",
            "-fflags",
            "+genpts",
            "-map_metadata",
            "-1",
            "-map_chapters",
            "-1",
            "-metadata",
            "title=",
            "-metadata",
            "comment=",
            "-y",
        ]
        .iter()
        .map(|arg| arg.to_string()),
    );
    args.push(output.display().to_string());
    args
}

fn mkvmerge_args(video: &Path, audio: Option<&Path>, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        output.display().to_string(),
        "--no-chapters".to_string(),
        "--no-global-tags".to_string(),
        "--no-track-tags".to_string(),
        "--title".to_string(),
        String::new(),
        "--disable-language-ietf".to_string(),
        video.display().to_string(),
    ];
    if let Some(audio) = audio {
        args.push(audio.display().to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::RecordingExecutor;
    use std::path::PathBuf;

    fn muxer() -> (Muxer, Arc<RecordingExecutor>) {
        let executor = Arc::new(RecordingExecutor::default());
        let muxer = Muxer::new(
            ToolPaths::default(),
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
        );
        (muxer, executor)
    }

    #[tokio::test]
    async fn ffmpeg_command_line_with_audio() {
        let (muxer, executor) = muxer();
        muxer
            .mux(
                Path::new("video.mp4"),
                Some(Path::new("audio.m4a")),
                Path::new("final.mp4"),
                MuxTool::Ffmpeg,
            )
            .await
            .unwrap();
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].0, PathBuf::from("ffmpeg"));
        let args = &calls[0].1;
        assert_eq!(&args[..4], &["-i", "video.mp4", "-i", "audio.m4a"]);
        assert!(args.contains(&"-bsf:a".to_string()));
        assert!(args
            .contains(&"+faststart+frag_keyframe+empty_moov+default_base_moof".to_string()));
        assert_eq!(args.last().unwrap(), "final.mp4");
        let genpts_pos = args.iter().position(|a| a == "+genpts").unwrap();
        assert_eq!(args[genpts_pos - 1], "-fflags");
    }

    #[tokio::test]
    async fn ffmpeg_video_only_omits_second_input() {
        let (muxer, executor) = muxer();
        muxer
            .mux(
                Path::new("video.ts"),
                None,
                Path::new("final.mp4"),
                MuxTool::Ffmpeg,
            )
            .await
            .unwrap();
        let calls = executor.calls.lock().unwrap();
        let args = &calls[0].1;
        assert_eq!(args.iter().filter(|arg| *arg == "-i").count(), 1);
    }

    #[tokio::test]
    async fn mkvmerge_command_line() {
        let (muxer, executor) = muxer();
        muxer
            .mux(
                Path::new("video.mp4"),
                Some(Path::new("audio.m4a")),
                Path::new("final.mkv"),
                MuxTool::Mkvtoolnix,
            )
            .await
            .unwrap();
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].0, PathBuf::from("mkvmerge"));
        assert_eq!(
            calls[0].1,
            vec![
                "-o",
                "final.mkv",
                "--no-chapters",
                "--no-global-tags",
                "--no-track-tags",
                "--title",
                "",
                "--disable-language-ietf",
                "video.mp4",
                "audio.m4a",
            ]
        );
    }
}
