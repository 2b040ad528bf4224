//! Metadata header parser.
//!
//! Reads `key: value` fields from the top of light markup documents, in the
//! MultiMarkdown style (`Author: me`) and in the reStructuredText
//! bibliographic style (`:Author: me`). An RST section title at the very top
//! becomes the `title` field:
//!
//! ```text
//! =========
//! The Title
//! =========
//! :author: foo
//! ```
//!
//! Continuation lines are indented; their indentation relative to the first
//! continuation line is preserved. The header ends at the first blank line and
//! everything after it is the body.

use crate::error::MetadataParseError;
use crate::types::Attributes;
use regex::Regex;
use std::sync::OnceLock;

const SECTION_SYMBOLS: &str = "\"!#$%&'()*+,-./:;<=>?@[\\]_`{|}~";
const TAB_WIDTH: usize = 4;

fn key_value_regex() -> &'static Regex {
    static KEY_VALUE: OnceLock<Regex> = OnceLock::new();
    KEY_VALUE.get_or_init(|| Regex::new(r"^:?(?P<key>[\w-]+):\s*(?P<value>.*)$").unwrap())
}

/// Fields and body of a parsed document. Field keys are lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    pub fields: Attributes,
    pub body: String,
}

/// A line made of one repeated section symbol (trailing whitespace allowed).
fn is_section_line(line: &str) -> bool {
    let Some(first) = line.chars().next() else {
        return false;
    };
    SECTION_SYMBOLS.contains(first) && line.trim().chars().all(|c| c == first)
}

/// Leading indentation width (tabs count as four) and the remaining content.
fn indent_count(line: &str) -> (usize, &str) {
    let mut width = 0;
    let mut consumed = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += TAB_WIDTH,
            _ => break,
        }
        consumed += 1;
    }
    (width, &line[consumed..])
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    ptr: usize,
    fields: Attributes,
    title: Option<String>,
}

impl<'a> Parser<'a> {
    fn look(&self, n: usize) -> Option<&'a str> {
        self.lines.get(self.ptr + n).copied()
    }

    fn consume(&mut self) -> Option<&'a str> {
        let line = self.look(0);
        if line.is_some() {
            self.ptr += 1;
        }
        line
    }

    fn at_field_line(&self) -> bool {
        self.look(0).map(|l| !l.trim().is_empty()).unwrap_or(false)
    }

    fn title_block(&mut self) -> Result<(), MetadataParseError> {
        let overlined = self.look(0).map(is_section_line).unwrap_or(false);
        if overlined {
            self.consume();
        }
        if self.look(1).map(is_section_line).unwrap_or(false) {
            self.title = self.consume().map(|t| t.trim_end().to_string());
            self.consume();
        } else if overlined {
            return Err(MetadataParseError::MalformedTitle { line: self.ptr });
        }
        Ok(())
    }

    /// Parse one field. Returns `false` when the header turned out to be body
    /// text, after resetting to the start of the document.
    fn key_value(&mut self) -> Result<bool, MetadataParseError> {
        let line = self.look(0).unwrap_or_default();
        let Some(caps) = key_value_regex().captures(line) else {
            if self.title.is_some() {
                return Err(MetadataParseError::FieldExpectedAfterTitle { line: self.ptr + 1 });
            }
            self.fields.clear();
            self.ptr = 0;
            return Ok(false);
        };
        self.consume();
        let key = caps["key"].to_lowercase();
        let mut value = caps["value"].to_string();

        let (mut indent, mut content) = indent_count(self.look(0).unwrap_or_default());
        let first_indent = indent;
        while indent > 0 {
            self.consume();
            if indent < first_indent {
                return Err(MetadataParseError::DecreasingIndent { line: self.ptr });
            }
            let pad = " ".repeat(indent - first_indent);
            if value.trim().is_empty() {
                value = format!("{}{}", pad, content);
            } else {
                value.push('\n');
                value.push_str(&pad);
                value.push_str(content);
            }
            (indent, content) = indent_count(self.look(0).unwrap_or_default());
        }

        self.fields.insert(key.trim().to_string(), value);
        Ok(true)
    }

    /// Remaining lines, minus one leading blank line.
    fn rest(&mut self) -> String {
        if self.look(0).map(|l| l.trim().is_empty()).unwrap_or(false) {
            self.consume();
        }
        self.lines[self.ptr.min(self.lines.len())..].join("\n")
    }
}

/// Split `text` into its metadata fields and body.
pub fn parse_metadata(text: &str) -> Result<ParsedDocument, MetadataParseError> {
    let mut parser = Parser {
        lines: text.split('\n').collect(),
        ptr: 0,
        fields: Attributes::new(),
        title: None,
    };

    if parser.at_field_line() {
        parser.title_block()?;
        while parser.at_field_line() {
            if !parser.key_value()? {
                break;
            }
        }
    }

    let body = parser.rest();
    let mut fields = std::mem::take(&mut parser.fields);
    if let Some(title) = parser.title.take() {
        fields.insert("title".to_string(), title);
    }
    Ok(ParsedDocument { fields, body })
}
