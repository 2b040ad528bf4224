//! Page formatters.
//!
//! A formatter turns page source plus the pattern default attributes into a
//! rendered body and the merged attribute set. Fields from the document's
//! metadata header override the defaults.

use crate::error::ApiError;
use crate::metadata::parse_metadata;
use crate::types::Attributes;
use pulldown_cmark::{html, Options, Parser};
use std::collections::HashMap;
use std::sync::Arc;

/// Output of one formatting pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedPage {
    pub body: String,
    pub attributes: Attributes,
}

impl FormattedPage {
    /// Fallback used when a page cannot be formatted: the escaped source and the
    /// defaults unmodified.
    pub fn fallback(source: &str, defaults: &Attributes) -> Self {
        Self {
            body: escape_html(source),
            attributes: defaults.clone(),
        }
    }
}

pub trait Formatter: Send + Sync {
    fn name(&self) -> &str;
    fn format(&self, source: &str, defaults: &Attributes) -> Result<FormattedPage, ApiError>;
}

fn merged(defaults: &Attributes, fields: Attributes) -> Attributes {
    let mut attributes = defaults.clone();
    attributes.extend(fields);
    attributes
}

/// Markdown with smart punctuation, tables and footnotes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn name(&self) -> &str {
        "markdown"
    }

    fn format(&self, source: &str, defaults: &Attributes) -> Result<FormattedPage, ApiError> {
        let doc = parse_metadata(source)?;
        let mut options = Options::empty();
        options.insert(Options::ENABLE_SMART_PUNCTUATION);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        let parser = Parser::new_ext(&doc.body, options);
        let mut body = String::with_capacity(doc.body.len() * 3 / 2);
        html::push_html(&mut body, parser);
        Ok(FormattedPage {
            body,
            attributes: merged(defaults, doc.fields),
        })
    }
}

/// Metadata header plus a preformatted body.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextFormatter;

impl Formatter for PlainTextFormatter {
    fn name(&self) -> &str {
        "plaintext"
    }

    fn format(&self, source: &str, defaults: &Attributes) -> Result<FormattedPage, ApiError> {
        let doc = parse_metadata(source)?;
        Ok(FormattedPage {
            body: format!("<pre>{}</pre>", escape_html(&doc.body)),
            attributes: merged(defaults, doc.fields),
        })
    }
}

/// Formatters by lower-cased name.
#[derive(Clone, Default)]
pub struct FormatterRegistry {
    formatters: HashMap<String, Arc<dyn Formatter>>,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `markdown` and `plaintext` formatters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MarkdownFormatter));
        registry.register(Arc::new(PlainTextFormatter));
        registry
    }

    pub fn register(&mut self, formatter: Arc<dyn Formatter>) {
        self.formatters
            .insert(formatter.name().to_lowercase(), formatter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Formatter>> {
        self.formatters.get(&name.trim().to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.formatters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatterRegistry")
            .field("formatters", &self.names())
            .finish()
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Attributes {
        Attributes::from([
            ("format".to_string(), "markdown".to_string()),
            ("template".to_string(), "page.html".to_string()),
            ("title".to_string(), "Untitled".to_string()),
        ])
    }

    #[test]
    fn test_markdown_merges_header_over_defaults() {
        let page = MarkdownFormatter
            .format("Title: Hello\nAuthor: Me\n\n# Heading\n\nSome *text*.\n", &defaults())
            .unwrap();
        assert_eq!(page.attributes["title"], "Hello");
        assert_eq!(page.attributes["author"], "Me");
        assert_eq!(page.attributes["template"], "page.html");
        assert!(page.body.contains("<h1>Heading</h1>"));
        assert!(page.body.contains("<em>text</em>"));
    }

    #[test]
    fn test_markdown_reports_header_errors() {
        let err = MarkdownFormatter
            .format("abstract:\n    one\n  two\n", &defaults())
            .unwrap_err();
        assert!(matches!(err, ApiError::MetadataParse(_)));
    }

    #[test]
    fn test_plaintext_escapes_body() {
        let page = PlainTextFormatter.format("a < b & c", &Attributes::new()).unwrap();
        assert_eq!(page.body, "<pre>a &lt; b &amp; c</pre>");
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry = FormatterRegistry::with_builtin();
        assert!(registry.get("Markdown").is_some());
        assert!(registry.get(" plaintext ").is_some());
        assert!(registry.get("textile").is_none());
        assert_eq!(registry.names(), vec!["markdown", "plaintext"]);
    }

    #[test]
    fn test_fallback_keeps_defaults() {
        let page = FormattedPage::fallback("<b>raw</b>", &defaults());
        assert_eq!(page.body, "&lt;b&gt;raw&lt;/b&gt;");
        assert_eq!(page.attributes, defaults());
    }
}
