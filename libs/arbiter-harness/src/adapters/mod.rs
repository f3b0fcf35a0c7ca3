//! Language runtime adapters.
//!
//! The pipeline stays language-agnostic. An adapter supplies the harness skeleton
//! that runs inside the target runtime, the escaping rules needed to embed data in
//! it, and the mapping from the runtime's startup failures onto [`ErrorKind`].

pub mod javascript;
pub mod php;
pub mod python;
pub mod ruby;

use std::collections::HashMap;

use arbiter_common::error::JudgeError;
use arbiter_common::types::{ErrorKind, Language};

pub use javascript::JavaScriptAdapter;
pub use php::PhpAdapter;
pub use python::PythonAdapter;
pub use ruby::RubyAdapter;

/// Contract every language adapter implements.
///
/// The skeleton returned by [`LanguageAdapter::skeleton`] is a handlebars template with
/// four triple-stash placeholders:
/// - `user_code`: the submission, inserted verbatim at the top of the unit when
///   some test calls into it, otherwise [`LanguageAdapter::blank_submission`];
/// - `tests_json`: the suite as a string literal holding JSON;
/// - `callables`: one [`LanguageAdapter::callable_entry`] per line;
/// - `user_source`: the submission again, as a string literal, for the stdio strategy.
///
/// [`LanguageAdapter::syntax_check_skeleton`] only takes `user_source` and prints
/// a single `{"valid": bool, "error": ...}` line.
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> Language;

    fn skeleton(&self) -> &'static str;

    fn syntax_check_skeleton(&self) -> &'static str;

    /// Stands in for `user_code` when every test runs the submission as a program.
    fn blank_submission(&self) -> &'static str {
        ""
    }

    /// Whether `function_call.kwargs` can be passed to a callable.
    fn supports_keyword_arguments(&self) -> bool {
        false
    }

    /// File name of the rendered unit inside the sandbox.
    fn source_file(&self) -> &'static str;

    /// Encode arbitrary text as a string literal of the target language.
    fn string_literal(&self, text: &str) -> String;

    /// One entry of the callable symbol table. `name` has already passed
    /// [`LanguageAdapter::is_valid_callable_name`].
    fn callable_entry(&self, name: &str) -> String;

    fn is_valid_callable_name(&self, name: &str) -> bool {
        is_plain_identifier(name)
    }

    /// Whether stderr of a unit that never reported shows a parse/compile failure.
    fn is_parse_error(&self, stderr: &str) -> bool;

    /// Classify a unit that exited before writing its report.
    fn classify_startup_failure(&self, stderr: &str) -> ErrorKind {
        if self.is_parse_error(stderr) {
            ErrorKind::CompileOrParseError
        } else {
            ErrorKind::RuntimeCrash
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// JSON string syntax, which Python and JavaScript both accept as a string literal.
pub(crate) fn json_string_literal(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// Single-quoted literal where only `\` and `'` need escaping (Ruby, PHP).
pub(crate) fn single_quoted_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Adapters keyed by language; resolves job identifiers.
pub struct AdapterRegistry {
    adapters: HashMap<Language, Box<dyn LanguageAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self { adapters: HashMap::new() }
    }

    /// Registry with every built-in adapter.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(PythonAdapter));
        registry.register(Box::new(JavaScriptAdapter));
        registry.register(Box::new(RubyAdapter));
        registry.register(Box::new(PhpAdapter));
        registry
    }

    /// Registry restricted to the given languages.
    pub fn only(languages: &[Language]) -> Self {
        let mut registry = Self::builtin();
        registry.adapters.retain(|language, _| languages.contains(language));
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn LanguageAdapter>) {
        self.adapters.insert(adapter.language(), adapter);
    }

    /// Resolve a job's language identifier to its adapter.
    pub fn resolve(&self, identifier: &str) -> Result<&dyn LanguageAdapter, JudgeError> {
        Language::from_str(identifier)
            .and_then(|language| self.adapters.get(&language))
            .map(|adapter| adapter.as_ref())
            .ok_or_else(|| JudgeError::UnsupportedLanguage(identifier.to_string()))
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.adapters.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
