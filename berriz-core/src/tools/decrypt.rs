//! Decryption via external tools: mp4decrypt or shaka-packager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::info;

use crate::config::DecryptionEngine;

use super::{run_tool, CommandExecutor, ToolError, ToolPaths, ToolResult};

pub struct Decryptor {
    tools: ToolPaths,
    executor: Arc<dyn CommandExecutor>,
}

impl Decryptor {
    pub fn new(tools: ToolPaths, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { tools, executor }
    }

    /// Decrypts `input` into `output` with the configured engine.
    /// `key_string` is whitespace-separated `KID:key` pairs for mp4decrypt
    /// and newline-separated pairs for shaka-packager.
    pub async fn decrypt(
        &self,
        input: &Path,
        output: &Path,
        key_string: &str,
        engine: DecryptionEngine,
        container: &str,
    ) -> ToolResult<PathBuf> {
        match engine {
            DecryptionEngine::Mp4decrypt => {
                info!(input = %input.display(), "decrypting with mp4decrypt");
                self.run_mp4decrypt(input, output, key_string).await?;
                Ok(output.to_path_buf())
            }
            DecryptionEngine::ShakaPackager => {
                info!(input = %input.display(), "decrypting with shaka-packager");
                self.run_packager(input, output, key_string, container).await
            }
        }
    }

    async fn run_mp4decrypt(
        &self,
        input: &Path,
        output: &Path,
        key_string: &str,
    ) -> ToolResult<()> {
        let mut args = Vec::new();
        for key in key_string.split_whitespace() {
            args.push("--key".to_string());
            args.push(key.to_string());
        }
        if args.is_empty() {
            return Err(ToolError::InvalidKey("empty key string".into()));
        }
        args.push(input.display().to_string());
        args.push(output.display().to_string());
        run_tool(&self.executor, &self.tools.mp4decrypt, &args).await
    }

    /// shaka-packager writes to a `.m4v` scratch name, which is renamed to
    /// the configured container on success.
    async fn run_packager(
        &self,
        input: &Path,
        output: &Path,
        key_string: &str,
        container: &str,
    ) -> ToolResult<PathBuf> {
        let scratch = output.with_extension("m4v");
        let mut args = vec![
            format!(
                "input={},stream_selector=0,output={}",
                input.display(),
                scratch.display()
            ),
            "--enable_raw_key_decryption".to_string(),
        ];
        let mut any_key = false;
        for line in key_string.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (kid, key) = line
                .split_once(':')
                .ok_or_else(|| ToolError::InvalidKey(line.to_string()))?;
            args.push("--keys".to_string());
            args.push(format!("key_id={kid}:key={key}"));
            any_key = true;
        }
        if !any_key {
            return Err(ToolError::InvalidKey("empty key string".into()));
        }
        run_tool(&self.executor, &self.tools.packager, &args).await?;

        let final_path = scratch.with_extension(container);
        if scratch != final_path {
            fs::rename(&scratch, &final_path).await?;
        }
        Ok(final_path)
    }
}

/// Normalizes resolver output to the per-engine key string shape.
pub fn key_string_for(keys: &[String], engine: DecryptionEngine) -> String {
    match engine {
        DecryptionEngine::Mp4decrypt => keys.join(" "),
        DecryptionEngine::ShakaPackager => keys.join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::RecordingExecutor;

    fn decryptor() -> (Decryptor, Arc<RecordingExecutor>) {
        let executor = Arc::new(RecordingExecutor::default());
        let decryptor = Decryptor::new(
            ToolPaths::default(),
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
        );
        (decryptor, executor)
    }

    #[tokio::test]
    async fn mp4decrypt_command_line() {
        let (decryptor, executor) = decryptor();
        decryptor
            .decrypt(
                Path::new("video.mp4"),
                Path::new("video_dec.mp4"),
                "1111:aaaa 2222:bbbb",
                DecryptionEngine::Mp4decrypt,
                "mp4",
            )
            .await
            .unwrap();
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, PathBuf::from("mp4decrypt"));
        assert_eq!(
            calls[0].1,
            vec![
                "--key",
                "1111:aaaa",
                "--key",
                "2222:bbbb",
                "video.mp4",
                "video_dec.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn packager_command_line_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("video.mp4");
        let output = dir.path().join("video_dec.mp4");
        // The executor does not spawn anything, so fake the scratch output.
        std::fs::write(output.with_extension("m4v"), b"decrypted").unwrap();

        let (decryptor, executor) = decryptor();
        let final_path = decryptor
            .decrypt(
                &input,
                &output,
                "1111:aaaa\n2222:bbbb",
                DecryptionEngine::ShakaPackager,
                "mp4",
            )
            .await
            .unwrap();
        assert_eq!(final_path, output.with_extension("mp4"));
        assert!(final_path.exists());

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0].0, PathBuf::from("packager"));
        assert_eq!(
            calls[0].1[0],
            format!(
                "input={},stream_selector=0,output={}",
                input.display(),
                output.with_extension("m4v").display()
            )
        );
        assert_eq!(calls[0].1[1], "--enable_raw_key_decryption");
        assert_eq!(calls[0].1[2], "--keys");
        assert_eq!(calls[0].1[3], "key_id=1111:key=aaaa");
        assert_eq!(calls[0].1[5], "key_id=2222:key=bbbb");
    }

    #[tokio::test]
    async fn malformed_key_is_rejected() {
        let (decryptor, _) = decryptor();
        let result = decryptor
            .decrypt(
                Path::new("a.mp4"),
                Path::new("b.mp4"),
                "not-a-kid-pair",
                DecryptionEngine::ShakaPackager,
                "mp4",
            )
            .await;
        assert!(matches!(result, Err(ToolError::InvalidKey(_))));
    }

    #[test]
    fn key_string_shapes() {
        let keys = vec!["1:a".to_string(), "2:b".to_string()];
        assert_eq!(key_string_for(&keys, DecryptionEngine::Mp4decrypt), "1:a 2:b");
        assert_eq!(
            key_string_for(&keys, DecryptionEngine::ShakaPackager),
            "1:a\n2:b"
        );
    }
}
