//! Static table of supported languages and how to build and run them.
//!
//! Each language is described by a [`LanguageSpec`]: the extension used for
//! the submitted source file, zero or more compile commands, and one run
//! command. Commands are [`CommandTemplate`]s whose arguments are either
//! literals or one of a closed set of [`Placeholder`]s, so resolving a
//! template always yields a plain argument vector and never goes through a
//! shell.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// File stem used for every submitted source file.
pub const SOURCE_STEM: &str = "Main";
/// Name of the native binary produced by compiled-binary languages.
pub const BINARY_NAME: &str = "main";
/// Entry class for languages that run by class name. Only one source file is
/// written per execution, so this is fixed.
pub const ENTRY_CLASS: &str = "Main";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unsupported language: {0:?}")]
    UnsupportedLanguage(String),
    #[error("timeout for {0} must be at least one second")]
    InvalidTimeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Source,
    Binary,
    EntryClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    Literal(&'static str),
    Placeholder(Placeholder),
}

/// Concrete values for the placeholders of one execution.
#[derive(Debug, Clone)]
pub struct Placeholders {
    pub source: PathBuf,
    pub binary: PathBuf,
    pub entry_class: &'static str,
}

impl Placeholders {
    /// Placeholder values for a workspace visible to the child at `root`.
    pub fn rooted_at(root: impl Into<PathBuf>, extension: &str) -> Self {
        let root = root.into();
        Self {
            source: root.join(format!("{SOURCE_STEM}{extension}")),
            binary: root.join(BINARY_NAME),
            entry_class: ENTRY_CLASS,
        }
    }

    fn value(&self, placeholder: Placeholder) -> String {
        match placeholder {
            Placeholder::Source => self.source.to_string_lossy().into_owned(),
            Placeholder::Binary => self.binary.to_string_lossy().into_owned(),
            Placeholder::EntryClass => self.entry_class.to_string(),
        }
    }
}

/// A command line with a mandatory program followed by arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: Arg,
    args: Vec<Arg>,
}

impl CommandTemplate {
    pub fn new(program: Arg, args: impl IntoIterator<Item = Arg>) -> Self {
        Self {
            program,
            args: args.into_iter().collect(),
        }
    }

    /// Resolves the template into an argument vector. The first element is
    /// the program; the vector is never empty.
    pub fn resolve(&self, placeholders: &Placeholders) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|arg| match arg {
                Arg::Literal(text) => text.to_string(),
                Arg::Placeholder(p) => placeholders.value(*p),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    id: &'static str,
    source_extension: &'static str,
    compile_steps: Vec<CommandTemplate>,
    run_step: CommandTemplate,
    timeout: Duration,
}

impl LanguageSpec {
    pub fn new(
        id: &'static str,
        source_extension: &'static str,
        compile_steps: Vec<CommandTemplate>,
        run_step: CommandTemplate,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            id,
            source_extension,
            compile_steps,
            run_step,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn source_extension(&self) -> &'static str {
        self.source_extension
    }

    pub fn compile_steps(&self) -> &[CommandTemplate] {
        &self.compile_steps
    }

    pub fn run_step(&self) -> &CommandTemplate {
        &self.run_step
    }

    /// Wall-clock ceiling applied separately to every compile step and to
    /// the run step.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_compiled(&self) -> bool {
        !self.compile_steps.is_empty()
    }
}

/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Registry {
    languages: HashMap<&'static str, LanguageSpec>,
}

impl Default for Registry {
    fn default() -> Self {
        use Arg::{Literal, Placeholder as P};
        use Placeholder::{Binary, EntryClass, Source};

        Self::from_specs([
            LanguageSpec::new(
                "python",
                ".py",
                vec![],
                CommandTemplate::new(Literal("python3"), [P(Source)]),
                10,
            ),
            LanguageSpec::new(
                "java",
                ".java",
                vec![CommandTemplate::new(Literal("javac"), [P(Source)])],
                CommandTemplate::new(Literal("java"), [Literal("-cp"), Literal("."), P(EntryClass)]),
                15,
            ),
            LanguageSpec::new(
                "cpp",
                ".cpp",
                vec![CommandTemplate::new(
                    Literal("g++"),
                    [Literal("-o"), P(Binary), P(Source)],
                )],
                CommandTemplate::new(P(Binary), Vec::new()),
                15,
            ),
        ])
    }
}

impl Registry {
    /// Builds a registry from explicit entries. Ids are expected lowercase;
    /// a later entry with the same id replaces an earlier one.
    pub fn from_specs(specs: impl IntoIterator<Item = LanguageSpec>) -> Self {
        Self {
            languages: specs.into_iter().map(|spec| (spec.id, spec)).collect(),
        }
    }

    /// Applies per-language timeout overrides, keyed by language id.
    pub fn with_timeouts(mut self, overrides: &HashMap<String, u64>) -> Result<Self, RegistryError> {
        for (id, seconds) in overrides {
            let key = id.to_ascii_lowercase();
            let spec = self
                .languages
                .get_mut(key.as_str())
                .ok_or_else(|| RegistryError::UnsupportedLanguage(id.clone()))?;
            if *seconds == 0 {
                return Err(RegistryError::InvalidTimeout(key));
            }
            spec.timeout = Duration::from_secs(*seconds);
        }
        Ok(self)
    }

    /// Case-insensitive lookup. No trimming and no fuzzy matching.
    pub fn lookup(&self, language_id: &str) -> Result<&LanguageSpec, RegistryError> {
        self.languages
            .get(language_id.to_ascii_lowercase().as_str())
            .ok_or_else(|| RegistryError::UnsupportedLanguage(language_id.to_string()))
    }

    /// All entries, sorted by id.
    pub fn languages(&self) -> Vec<&LanguageSpec> {
        let mut specs: Vec<_> = self.languages.values().collect();
        specs.sort_by_key(|spec| spec.id);
        specs
    }
}
