//! Prompt templates in the prompty format.
//!
//! A prompty file is YAML front matter between `---` lines followed by a body
//! split into role sections:
//!
//! ```text
//! ---
//! name: Chat Prompt
//! model:
//!     api: chat
//! ---
//! system:
//! You are a helpful assistant for {{ company }}.
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{info, warn};

use crate::error::PromptError;
use crate::project::{ChatMessage, ChatRole};

/// File name of the chat prompt template.
pub const PROMPT_FILE_NAME: &str = "prompt.prompty";

/// Template file next to the bootstrapper source.
pub const PROMPT_TEMPLATE_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/src/prompt.prompty");

/// Copy of the template compiled into the binary.
pub const BUNDLED_PROMPT: &str = include_str!("prompt.prompty");

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

static ROLE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(system|user|assistant)\s*:\s*$").expect("role pattern is valid")
});

/// Front matter of a prompty file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Model settings, kept as raw YAML.
    #[serde(default)]
    pub model: Option<Value>,
    /// Declared inputs, kept as raw YAML.
    #[serde(default)]
    pub inputs: Option<Value>,
    /// Sample inputs, kept as raw YAML.
    #[serde(default)]
    pub sample: Option<Value>,
}

/// A parsed prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    metadata: PromptMetadata,
    sections: Vec<(ChatRole, String)>,
    source: Option<PathBuf>,
}

impl PromptTemplate {
    /// Load a template from a `.prompty` file.
    pub fn from_prompty(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut template = Self::parse(&content)?;
        template.source = Some(path.to_path_buf());

        info!(
            path = %path.display(),
            name = ?template.metadata.name,
            sections = template.sections.len(),
            "Loaded prompt template"
        );
        Ok(template)
    }

    /// Load the chat prompt template.
    ///
    /// Looks for `prompt.prompty` beside the executable, then in the source
    /// tree, and falls back to the copy compiled into the binary.
    pub fn load_default() -> Result<Self, PromptError> {
        Self::load_first_or_bundled(&default_locations())
    }

    /// Load the first of `candidates` that exists, else the bundled template.
    ///
    /// A candidate that exists but fails to read or parse is an error.
    pub fn load_first_or_bundled(candidates: &[PathBuf]) -> Result<Self, PromptError> {
        if let Some(path) = candidates.iter().find(|p| p.is_file()) {
            return Self::from_prompty(path);
        }

        warn!(
            searched = ?candidates,
            "No prompt template file found; using the bundled template"
        );
        Self::parse(BUNDLED_PROMPT)
    }

    /// Parse template text.
    pub fn parse(content: &str) -> Result<Self, PromptError> {
        let (front_matter, body) = split_front_matter(content)?;

        let metadata: PromptMetadata = if front_matter.trim().is_empty() {
            PromptMetadata::default()
        } else {
            serde_yaml::from_str(front_matter)?
        };

        Ok(Self {
            metadata,
            sections: parse_sections(body),
            source: None,
        })
    }

    pub fn metadata(&self) -> &PromptMetadata {
        &self.metadata
    }

    /// File the template was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Render the template into chat messages.
    ///
    /// Unknown placeholders render as empty strings.
    pub fn create_messages(&self, inputs: &HashMap<String, String>) -> Vec<ChatMessage> {
        self.sections
            .iter()
            .map(|(role, text)| ChatMessage::new(*role, render(text, inputs)))
            .collect()
    }
}

/// Where [`PromptTemplate::load_default`] looks for the template, in order.
pub fn default_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        locations.push(dir.join(PROMPT_FILE_NAME));
    }
    locations.push(PathBuf::from(PROMPT_TEMPLATE_PATH));
    locations
}

fn split_front_matter(content: &str) -> Result<(&str, &str), PromptError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut lines = content.split_inclusive('\n');

    match lines.next() {
        Some(first) if first.trim() == "---" => {}
        _ => return Err(PromptError::MissingFrontMatter),
    }

    let start = content.find('\n').map(|i| i + 1).unwrap_or(content.len());
    let mut offset = start;
    for line in lines {
        if line.trim() == "---" {
            return Ok((&content[start..offset], &content[offset + line.len()..]));
        }
        offset += line.len();
    }

    Err(PromptError::MissingFrontMatter)
}

fn parse_sections(body: &str) -> Vec<(ChatRole, String)> {
    let mut sections = Vec::new();
    let mut role = ChatRole::System;
    let mut text = String::new();

    for line in body.lines() {
        if let Some(caps) = ROLE_MARKER.captures(line) {
            push_section(&mut sections, role, &text);
            text.clear();
            role = caps[1].to_lowercase().parse().unwrap_or(ChatRole::System);
            continue;
        }
        text.push_str(line);
        text.push('\n');
    }
    push_section(&mut sections, role, &text);

    sections
}

fn push_section(sections: &mut Vec<(ChatRole, String)>, role: ChatRole, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        sections.push((role, text.to_string()));
    }
}

fn render(text: &str, inputs: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            inputs.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const TEMPLATE: &str = "---\nname: Chat Prompt\ndescription: Answers questions\nmodel:\n    api: chat\n---\nsystem:\nYou help {{ guest }} at {{hotel}}.\n\nuser:\n{{question}}\n";

    #[test]
    fn parses_front_matter_and_sections() {
        let template = PromptTemplate::parse(TEMPLATE).unwrap();

        assert_eq!(template.metadata().name.as_deref(), Some("Chat Prompt"));
        assert_eq!(template.metadata().description.as_deref(), Some("Answers questions"));
        assert!(template.metadata().model.is_some());

        let inputs = HashMap::from([
            ("guest".to_string(), "Ada".to_string()),
            ("hotel".to_string(), "the Grand".to_string()),
            ("question".to_string(), "Is breakfast included?".to_string()),
        ]);

        assert_eq!(
            template.create_messages(&inputs),
            vec![
                ChatMessage::system("You help Ada at the Grand."),
                ChatMessage::user("Is breakfast included?"),
            ]
        );
    }

    #[test]
    fn missing_inputs_render_empty() {
        let template = PromptTemplate::parse(TEMPLATE).unwrap();

        let messages = template.create_messages(&HashMap::new());

        assert_eq!(messages[0].content, "You help  at .");
        assert_eq!(messages[1], ChatMessage::user(""));
    }

    #[test]
    fn text_before_markers_is_system() {
        let template = PromptTemplate::parse("---\n---\nBe concise.\nassistant:\nHello!\n").unwrap();

        assert_eq!(
            template.create_messages(&HashMap::new()),
            vec![ChatMessage::system("Be concise."), ChatMessage::assistant("Hello!")]
        );
    }

    #[test]
    fn role_markers_are_case_insensitive() {
        let template = PromptTemplate::parse("---\n---\nSystem:\nhi\nUSER:\nthere\n").unwrap();

        let roles: Vec<ChatRole> = template
            .create_messages(&HashMap::new())
            .into_iter()
            .map(|m| m.role)
            .collect();

        assert_eq!(roles, vec![ChatRole::System, ChatRole::User]);
    }

    #[test]
    fn inline_role_text_is_not_a_marker() {
        let template = PromptTemplate::parse("---\n---\nsystem:\nnote: user: is not a marker\n").unwrap();

        assert_eq!(
            template.create_messages(&HashMap::new()),
            vec![ChatMessage::system("note: user: is not a marker")]
        );
    }

    #[test]
    fn rejects_missing_front_matter() {
        assert!(matches!(
            PromptTemplate::parse("system:\nhi\n"),
            Err(PromptError::MissingFrontMatter)
        ));
        assert!(matches!(
            PromptTemplate::parse("---\nname: unterminated\n"),
            Err(PromptError::MissingFrontMatter)
        ));
    }

    #[test]
    fn rejects_invalid_yaml() {
        assert!(matches!(
            PromptTemplate::parse("---\nname: [unclosed\n---\nsystem:\nhi\n"),
            Err(PromptError::FrontMatter(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEMPLATE.as_bytes()).unwrap();

        let template = PromptTemplate::from_prompty(file.path()).unwrap();

        assert_eq!(template.source(), Some(file.path()));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            PromptTemplate::from_prompty("/definitely/not/here.prompty"),
            Err(PromptError::Read { .. })
        ));
    }

    #[test]
    fn bundled_template_parses() {
        let template = PromptTemplate::from_prompty(PROMPT_TEMPLATE_PATH).unwrap();

        let messages = template.create_messages(&HashMap::new());
        assert_eq!(messages[0].role, ChatRole::System);
    }

    #[test]
    fn falls_back_to_compiled_template_when_no_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let missing = vec![
            dir.path().join(PROMPT_FILE_NAME),
            PathBuf::from("/build/elsewhere/src/prompt.prompty"),
        ];

        let template = PromptTemplate::load_first_or_bundled(&missing).unwrap();
        let bundled = PromptTemplate::parse(BUNDLED_PROMPT).unwrap();

        assert_eq!(template.source(), None);
        assert_eq!(template.metadata().name, bundled.metadata().name);
        assert_eq!(
            template.create_messages(&HashMap::new()),
            bundled.create_messages(&HashMap::new())
        );
    }

    #[test]
    fn file_beside_executable_wins_over_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let deployed = dir.path().join(PROMPT_FILE_NAME);
        std::fs::write(&deployed, "---\nname: Deployed\n---\nsystem:\nDeployed prompt.\n").unwrap();
        let candidates = vec![deployed.clone(), PathBuf::from(PROMPT_TEMPLATE_PATH)];

        let template = PromptTemplate::load_first_or_bundled(&candidates).unwrap();

        assert_eq!(template.source(), Some(deployed.as_path()));
        assert_eq!(template.metadata().name.as_deref(), Some("Deployed"));
    }

    #[test]
    fn broken_template_file_is_not_replaced_by_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join(PROMPT_FILE_NAME);
        std::fs::write(&broken, "no front matter here").unwrap();

        let err = PromptTemplate::load_first_or_bundled(&[broken]).unwrap_err();

        assert!(matches!(err, PromptError::MissingFrontMatter));
    }

    #[test]
    fn default_locations_start_beside_executable() {
        let locations = default_locations();
        let exe_dir = std::env::current_exe().unwrap().parent().unwrap().to_path_buf();

        assert_eq!(locations[0], exe_dir.join(PROMPT_FILE_NAME));
        assert_eq!(locations.last().unwrap(), &PathBuf::from(PROMPT_TEMPLATE_PATH));
    }
}
