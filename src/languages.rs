//! Language profile registry
//!
//! Maps a language identifier to its source file name, optional compile
//! step and run invocation. The registry is built once at start-up and
//! shared immutably.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::core::UnsupportedLanguage;

/// Built-in language table
const BUILTIN_LANGUAGES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));

/// Configuration for a supported programming language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageProfile {
    /// Canonical language name (e.g., "cpp")
    pub name: String,
    /// Name of the source file (e.g., "solution.cpp")
    pub source_file: String,
    /// Compile command (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command
    pub run_command: Vec<String>,
    /// Time limit multiplier and bonus: (multiplier, bonus_seconds)
    /// actual_time = base_time * multiplier + bonus
    pub time_limit: Option<(u32, u32)>,
}

impl LanguageProfile {
    pub fn is_compiled(&self) -> bool {
        self.compile_command.is_some()
    }

    /// Adjust a problem's base time limit for this language
    pub fn time_limit_for(&self, base: Duration) -> Duration {
        match self.time_limit {
            Some((multiplier, bonus_seconds)) => {
                base * multiplier + Duration::from_secs(u64::from(bonus_seconds))
            }
            None => base,
        }
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    time_limit: Vec<u32>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Immutable set of language profiles
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    profiles: HashMap<String, LanguageProfile>,
    /// alias (lowercase) -> canonical name
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Registry with the languages shipped in `files/languages.toml`
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_LANGUAGES).context("Invalid built-in language table")
    }

    /// Load a registry from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read language config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid language config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

        let mut registry = Self::default();
        for (name, raw) in raw_configs {
            let name = name.to_lowercase();

            let time_limit = match raw.time_limit.as_slice() {
                [] => None,
                [multiplier, bonus] => Some((*multiplier, *bonus)),
                other => anyhow::bail!("Invalid time limit for {}: {:?}", name, other),
            };

            let run_command = into_command(&raw.run_command);
            if run_command.is_empty() {
                anyhow::bail!("Empty run command for {}", name);
            }
            let compile_command = raw
                .compile_command
                .map(|cmd| into_command(&cmd))
                .filter(|cmd| !cmd.is_empty());

            for alias in raw.aliases {
                registry.aliases.insert(alias.to_lowercase(), name.clone());
            }
            registry.profiles.insert(
                name.clone(),
                LanguageProfile {
                    name,
                    source_file: raw.source_file,
                    compile_command,
                    run_command,
                    time_limit,
                },
            );
        }

        Ok(registry)
    }

    /// Look up a profile by language name or alias (case-insensitive)
    pub fn get(&self, language: &str) -> Result<&LanguageProfile, UnsupportedLanguage> {
        let key = language.trim().to_lowercase();
        let canonical = self.aliases.get(&key).unwrap_or(&key);
        self.profiles
            .get(canonical)
            .ok_or_else(|| UnsupportedLanguage(language.to_string()))
    }

    /// Canonical names of all supported languages, sorted
    pub fn supported_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
