//! Registry of named prompt templates with strict rendering.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::TemplateError;
use crate::prompts::templates::BUILTIN_TEMPLATES;

/// Extensions recognized when loading an override directory.
const TEMPLATE_EXTENSIONS: &[&str] = &["txt", "tera"];

/// Named prompt templates, rendered through tera.
///
/// Rendering is strict: a template variable with no matching context value
/// is a [`TemplateError::Render`], never an empty substitution.
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl PromptLibrary {
    /// Create an empty library.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Create a library with every built-in template registered.
    pub fn builtin() -> Self {
        let mut library = Self::empty();
        for (name, text) in BUILTIN_TEMPLATES {
            library.templates.insert((*name).to_string(), (*text).to_string());
        }
        library
    }

    /// Register a template, replacing any existing one with the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), TemplateError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(TemplateError::InvalidTemplateName(name));
        }
        self.templates.insert(name, text.into());
        Ok(())
    }

    /// Load every template file under `dir` (recursively), overriding
    /// registered templates by file stem. Returns the number loaded.
    pub fn load_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize, TemplateError> {
        let dir = dir.as_ref();
        let mut loaded = 0usize;

        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| {
                TemplateError::Io(std::io::Error::other(format!(
                    "failed to walk '{}': {e}",
                    dir.display()
                )))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let extension = path.extension().and_then(|ext| ext.to_str());
            if !extension.is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext)) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let text = std::fs::read_to_string(path)?;
            debug!(template = stem, path = %path.display(), "loaded prompt override");
            self.register(stem.to_string(), text)?;
            loaded += 1;
        }

        info!(count = loaded, dir = %dir.display(), "prompt overrides loaded");
        Ok(loaded)
    }

    /// Whether a template with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Names of all registered templates, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the library has no templates.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render a template with the given context.
    pub fn render(&self, name: &str, context: &tera::Context) -> Result<String, TemplateError> {
        let text = self
            .templates
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;

        tera::Tera::one_off(text, context, false).map_err(|e| TemplateError::Render {
            name: name.to_string(),
            message: flatten_tera_error(&e),
        })
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Template names mirror identifier rules so they can double as file stems.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Tera nests the useful message in the error source chain.
fn flatten_tera_error(err: &tera::Error) -> String {
    use std::error::Error as _;
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_library_is_populated() {
        let library = PromptLibrary::builtin();
        assert!(!library.is_empty());
        assert!(library.contains("statement"));
        assert!(library.contains("continue_or_finish"));
        assert!(library.contains("classify_variable_type"));
    }

    #[test]
    fn test_render_substitutes_variables() {
        let mut library = PromptLibrary::empty();
        library
            .register("greet", "Hello {{ name }}, you are {{ role }}.")
            .unwrap();

        let mut context = tera::Context::new();
        context.insert("name", "ada");
        context.insert("role", "buyer");

        let rendered = library.render("greet", &context).unwrap();
        assert_eq!(rendered, "Hello ada, you are buyer.");
    }

    #[test]
    fn test_render_missing_variable_errors() {
        let mut library = PromptLibrary::empty();
        library.register("greet", "Hello {{ name }}.").unwrap();

        let err = library.render("greet", &tera::Context::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
        assert!(err.to_string().contains("greet"));
    }

    #[test]
    fn test_render_unknown_template_errors() {
        let library = PromptLibrary::empty();
        let err = library.render("nope", &tera::Context::new()).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(name) if name == "nope"));
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let mut library = PromptLibrary::empty();
        let err = library.register("bad name", "text").unwrap_err();
        assert!(matches!(err, TemplateError::InvalidTemplateName(_)));

        let err = library.register("", "text").unwrap_err();
        assert!(matches!(err, TemplateError::InvalidTemplateName(_)));
    }

    #[test]
    fn test_load_directory_overrides_builtins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("statement.txt"), "override {{ scenario }}").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let mut library = PromptLibrary::builtin();
        let loaded = library.load_directory(dir.path()).unwrap();
        assert_eq!(loaded, 1);

        let mut context = tera::Context::new();
        context.insert("scenario", "a bake sale");
        let rendered = library.render("statement", &context).unwrap();
        assert_eq!(rendered, "override a bake sale");
    }

    #[test]
    fn test_load_directory_recurses() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("survey");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("extra_probe.txt"), "probe {{ variable }}").unwrap();

        let mut library = PromptLibrary::empty();
        let loaded = library.load_directory(dir.path()).unwrap();
        assert_eq!(loaded, 1);
        assert!(library.contains("extra_probe"));
    }

    #[test]
    fn test_names_sorted() {
        let mut library = PromptLibrary::empty();
        library.register("zeta", "z").unwrap();
        library.register("alpha", "a").unwrap();
        assert_eq!(library.names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_builtins_render_with_no_stray_braces() {
        // Every built-in must be valid tera source; render failures here
        // should only ever be missing variables.
        let library = PromptLibrary::builtin();
        for name in library.names() {
            let result = library.render(name, &tera::Context::new());
            if let Err(TemplateError::Render { message, .. }) = &result {
                assert!(
                    message.contains("not found") || message.contains("Variable"),
                    "template '{name}' failed to parse: {message}"
                );
            }
        }
    }
}
