pub mod hls;
pub mod mpd;
pub mod pssh;
mod xml;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid XML: {0}")]
    Xml(String),
    #[error("manifest is malformed: {0}")]
    Malformed(String),
    #[error("playlist failed to parse: {0}")]
    Playlist(String),
    #[error("invalid track choice: {0}")]
    InvalidChoice(String),
    #[error("no track matches choice {0}")]
    NoMatch(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

pub type ManifestResult<T> = Result<T, ManifestError>;

/// Per-track user choice from config: omit the track, prompt, or match an
/// exact height (video) / bandwidth in kbps (audio).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackChoice {
    None,
    Ask,
    Exact(u32),
}

impl TrackChoice {
    pub fn parse(value: &str) -> ManifestResult<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("none") {
            return Ok(TrackChoice::None);
        }
        if trimmed.eq_ignore_ascii_case("ask") || trimmed.eq_ignore_ascii_case("as") {
            return Ok(TrackChoice::Ask);
        }
        trimmed
            .parse()
            .map(TrackChoice::Exact)
            .map_err(|_| ManifestError::InvalidChoice(value.to_string()))
    }
}

/// Interactive selection lives outside the core; the pipeline injects this
/// when a choice is `ask`.
#[async_trait]
pub trait TrackPrompt: Send + Sync {
    /// Returns the index of the chosen option.
    async fn choose(&self, message: &str, options: &[String]) -> usize;
}

/// Non-interactive default: first option for audio, last (highest) for
/// video-style lists where options are sorted ascending.
pub struct LastOptionPrompt;

#[async_trait]
impl TrackPrompt for LastOptionPrompt {
    async fn choose(&self, _message: &str, options: &[String]) -> usize {
        options.len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_choice_parsing() {
        assert_eq!(TrackChoice::parse("none").unwrap(), TrackChoice::None);
        assert_eq!(TrackChoice::parse("ask").unwrap(), TrackChoice::Ask);
        assert_eq!(TrackChoice::parse("as").unwrap(), TrackChoice::Ask);
        assert_eq!(TrackChoice::parse("1080").unwrap(), TrackChoice::Exact(1080));
        assert!(TrackChoice::parse("best").is_err());
    }
}
