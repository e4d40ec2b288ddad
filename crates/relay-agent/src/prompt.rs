use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::pipeline::trigger::TriggerKind;

/// Used when the character file is missing, unreadable, or empty.
pub const DEFAULT_SYSTEM_PROMPT: &str = "あなたは親切なAIアシスタントです。";

/// Appended to every system prompt; user turns are sent as `"name: text"`.
pub const SPEAKER_INSTRUCTION: &str = "Several people may be talking in this channel. \
Each user message starts with the speaker's name followed by a colon, like \"name: text\". \
Use these names to tell the speakers apart and address them by name when it helps. \
Do not start your own replies with a name prefix.";

/// Persona loaded from the character file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CharacterProfile {
    pub system_prompt: String,
}

impl Default for CharacterProfile {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{path} has an empty system_prompt")]
    EmptyPrompt { path: PathBuf },
}

impl CharacterProfile {
    /// Read `{ "system_prompt": "..." }` from `path`.
    pub fn from_file(path: &Path) -> Result<Self, ProfileError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let profile: CharacterProfile =
            serde_json::from_str(&raw).map_err(|source| ProfileError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if profile.system_prompt.trim().is_empty() {
            return Err(ProfileError::EmptyPrompt {
                path: path.to_path_buf(),
            });
        }
        Ok(profile)
    }

    /// Full system message for one reply: persona, speaker instruction,
    /// then the fragment for the trigger kind (if any).
    pub fn system_text(&self, kind: TriggerKind) -> String {
        let mut out = self.system_prompt.trim().to_string();
        out.push_str("\n\n");
        out.push_str(SPEAKER_INSTRUCTION);
        if let Some(fragment) = kind.instruction() {
            out.push_str("\n\n");
            out.push_str(fragment);
        }
        out
    }
}

/// Reads the character file on every call, so edits apply to the next reply
/// without a restart.
#[derive(Debug, Clone)]
pub struct CharacterLoader {
    path: PathBuf,
}

impl CharacterLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the profile, falling back to [`DEFAULT_SYSTEM_PROMPT`] on any error.
    pub fn load(&self) -> CharacterProfile {
        match CharacterProfile::from_file(&self.path) {
            Ok(profile) => {
                debug!(path = %self.path.display(), "character profile loaded");
                profile
            }
            Err(e) => {
                warn!(error = %e, "character profile unavailable, using default prompt");
                CharacterProfile::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_system_prompt_from_json() {
        let file = write_temp(r#"{"system_prompt":"You are Kotone."}"#);
        let profile = CharacterLoader::new(file.path()).load();
        assert_eq!(profile.system_prompt, "You are Kotone.");
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CharacterLoader::new(dir.path().join("nope.json"));
        assert!(matches!(
            CharacterProfile::from_file(loader.path()),
            Err(ProfileError::Read { .. })
        ));
        assert_eq!(loader.load(), CharacterProfile::default());
    }

    #[test]
    fn malformed_file_falls_back_to_default() {
        let file = write_temp("{ system_prompt: nope");
        assert!(matches!(
            CharacterProfile::from_file(file.path()),
            Err(ProfileError::Parse { .. })
        ));
        assert_eq!(
            CharacterLoader::new(file.path()).load().system_prompt,
            DEFAULT_SYSTEM_PROMPT
        );
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let file = write_temp(r#"{"system_prompt":"   "}"#);
        assert!(matches!(
            CharacterProfile::from_file(file.path()),
            Err(ProfileError::EmptyPrompt { .. })
        ));
    }

    #[test]
    fn file_is_reread_on_every_load() {
        let file = write_temp(r#"{"system_prompt":"first"}"#);
        let loader = CharacterLoader::new(file.path());
        assert_eq!(loader.load().system_prompt, "first");

        std::fs::write(file.path(), r#"{"system_prompt":"second"}"#).unwrap();
        assert_eq!(loader.load().system_prompt, "second");
    }

    #[test]
    fn system_text_depends_on_trigger_kind() {
        let profile = CharacterProfile {
            system_prompt: "You are Kotone.".into(),
        };

        let mention = profile.system_text(TriggerKind::Mention);
        assert!(mention.starts_with("You are Kotone."));
        assert!(mention.ends_with(SPEAKER_INSTRUCTION));

        let keyword = profile.system_text(TriggerKind::Keyword);
        let question = profile.system_text(TriggerKind::Question);
        assert!(keyword.contains(SPEAKER_INSTRUCTION));
        assert!(keyword.ends_with(TriggerKind::Keyword.instruction().unwrap()));
        assert!(question.ends_with(TriggerKind::Question.instruction().unwrap()));
        assert_ne!(keyword, question);
    }
}
