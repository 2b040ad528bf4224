//! Site configuration.
//!
//! The site configuration is a YAML document stored in the remote tree and
//! fetched as a `ConfigResource`:
//!
//! ```yaml
//! site_constants:
//!   title: My site
//! resource_default_attributes:
//!   - pattern: '.*\.txt$'
//!     resource_class: PageResource
//!     format: markdown
//! ```
//!
//! Rules from the document are appended to the built-in rules. Any problem
//! falls back to the built-in part and is reported.

use crate::error::StorageError;
use crate::resource::resolver::RESOURCE_CLASS;
use crate::resource::ResourceClass;
use crate::site::SiteListener;
use crate::store::SiteStore;
use crate::types::Attributes;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde_yaml::Value as YamlValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const SITE_CONSTANTS: &str = "site_constants";
const RULES: &str = "resource_default_attributes";

pub const DEFAULT_SITE_YAML: &str = r#"
site_constants:
  title: Site in a folder
  lang: en
resource_default_attributes:
  - pattern: '.*/$'
    resource_class: PageResource
    template: dir.html
  - pattern: '.*\.(txt|md|markdown|mkd)$'
    resource_class: PageResource
    format: markdown
    template: page.html
  - pattern: '.*\.css$'
    resource_class: RawResource
    content_type: text/css
  - pattern: '.*\.js$'
    resource_class: RawResource
    content_type: application/javascript
  - pattern: '.*\.ico$'
    resource_class: RawResource
    content_type: image/x-icon
  - pattern: '.*\.(jpg|jpeg|png|gif|bmp)$'
    resource_class: ImageResource
  - pattern: '/templates/'
    resource_class: none
"#;

/// Attributes applied to every path the pattern matches.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub pattern: Regex,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    pub site_constants: Attributes,
    pub rules: Vec<PatternRule>,
}

impl SiteConfig {
    /// Built-in configuration only.
    pub fn builtin() -> Self {
        parse_site_config(Some(""), "").0
    }

    /// Merge the attributes of every matching rule, later rules winning.
    pub fn attributes_for(&self, canonical_path: &str, config_path: &str) -> Attributes {
        let mut attributes = Attributes::new();
        for rule in &self.rules {
            if rule.pattern.is_match(canonical_path) {
                attributes.extend(rule.attributes.clone());
            }
        }
        let config_class = ResourceClass::Config.as_str();
        if canonical_path.eq_ignore_ascii_case(config_path) {
            attributes.insert(RESOURCE_CLASS.to_string(), config_class.to_string());
        } else if attributes.get(RESOURCE_CLASS).map(String::as_str) == Some(config_class) {
            warn!(path = canonical_path, "Only the site configuration may be a ConfigResource");
            attributes.remove(RESOURCE_CLASS);
        }
        attributes
    }
}

fn scalar_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Null => Some(String::new()),
        _ => None,
    }
}

fn string_map(value: &YamlValue) -> Result<Attributes, String> {
    let YamlValue::Mapping(map) = value else {
        return Err(format!("expected a map, found {:?}", value));
    };
    let mut attributes = Attributes::new();
    for (key, value) in map {
        let key = scalar_string(key).ok_or_else(|| format!("invalid key {:?}", key))?;
        let value = match scalar_string(value) {
            Some(value) => value,
            None => serde_yaml::to_string(value)
                .map_err(|e| e.to_string())?
                .trim_end()
                .to_string(),
        };
        attributes.insert(key, value);
    }
    Ok(attributes)
}

fn compile_rules(value: &YamlValue) -> Result<Vec<PatternRule>, String> {
    let YamlValue::Sequence(items) = value else {
        return Err(format!("expected a list, found {:?}", value));
    };
    let mut rules = Vec::with_capacity(items.len());
    for item in items {
        let mut attributes = string_map(item)?;
        let Some(pattern) = attributes.remove("pattern") else {
            continue;
        };
        let pattern = RegexBuilder::new(&format!("^(?:{})", pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| e.to_string())?;
        rules.push(PatternRule { pattern, attributes });
    }
    Ok(rules)
}

fn parse_document(source: &str) -> Result<YamlValue, String> {
    if source.trim().is_empty() {
        return Ok(YamlValue::Mapping(Default::default()));
    }
    serde_yaml::from_str(source).map_err(|e| e.to_string())
}

/// Parse the site configuration. `None` means the file does not exist.
///
/// Returns the configuration together with the problems found; the
/// configuration is always usable.
pub fn parse_site_config(source: Option<&str>, config_path: &str) -> (SiteConfig, Vec<String>) {
    let mut errors = Vec::new();

    let builtin = parse_document(DEFAULT_SITE_YAML).unwrap_or(YamlValue::Null);
    let builtin_constants = builtin
        .get(SITE_CONSTANTS)
        .and_then(|v| string_map(v).ok())
        .unwrap_or_default();
    let builtin_rules = builtin
        .get(RULES)
        .and_then(|v| compile_rules(v).ok())
        .unwrap_or_default();

    let document = match source {
        None => {
            errors.push(format!(
                "The config file {} was not found (it may not be fetched yet)",
                config_path
            ));
            None
        }
        Some(source) => match parse_document(source) {
            Ok(document) => Some(document),
            Err(e) => {
                errors.push(format!("Error in config file {}: {}", config_path, e));
                None
            }
        },
    };

    let site_constants = match document.as_ref().and_then(|d| d.get(SITE_CONSTANTS)) {
        None => builtin_constants.clone(),
        Some(value) => string_map(value).unwrap_or_else(|e| {
            errors.push(format!("The {} field in {}: {}", SITE_CONSTANTS, config_path, e));
            builtin_constants.clone()
        }),
    };

    let mut rules = builtin_rules;
    if let Some(value) = document.as_ref().and_then(|d| d.get(RULES)) {
        match compile_rules(value) {
            Ok(extra) => rules.extend(extra),
            Err(e) => errors.push(format!(
                "Resource default attributes in {} are invalid: {}",
                config_path, e
            )),
        }
    }

    (SiteConfig { site_constants, rules }, errors)
}

struct CacheState {
    /// Revision of the config resource the cached entries were built from.
    token: Option<Option<String>>,
    config: Arc<SiteConfig>,
    attributes: HashMap<String, Attributes>,
}

/// Parsed site configuration and computed default attributes, valid for one
/// revision of the configuration resource.
pub struct ConfigCache {
    config_path: String,
    state: RwLock<CacheState>,
}

impl ConfigCache {
    pub fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            state: RwLock::new(CacheState {
                token: None,
                config: Arc::new(SiteConfig::default()),
                attributes: HashMap::new(),
            }),
        }
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.token = None;
        state.attributes.clear();
    }

    /// The current configuration, re-parsed when the stored config resource
    /// changed since the last call.
    pub fn site_config(
        &self,
        store: &dyn SiteStore,
        listener: &dyn SiteListener,
    ) -> Result<Arc<SiteConfig>, StorageError> {
        let resource = store.get_resource(&self.config_path)?;
        let token = resource.as_ref().and_then(|r| r.revision.clone());
        {
            let state = self.state.read();
            if state.token.as_ref() == Some(&token) {
                return Ok(Arc::clone(&state.config));
            }
        }

        let source = resource.as_ref().and_then(|r| r.text_source());
        let (config, errors) = parse_site_config(source, &self.config_path);
        for error in &errors {
            listener.config_error(error);
        }
        debug!(
            config_path = %self.config_path,
            rules = config.rules.len(),
            "Parsed site configuration"
        );

        let config = Arc::new(config);
        let mut state = self.state.write();
        state.token = Some(token);
        state.config = Arc::clone(&config);
        state.attributes.clear();
        Ok(config)
    }

    /// Default attributes for a canonical path.
    pub fn default_attributes(
        &self,
        store: &dyn SiteStore,
        listener: &dyn SiteListener,
        canonical_path: &str,
    ) -> Result<Attributes, StorageError> {
        let config = self.site_config(store, listener)?;
        if let Some(cached) = self.state.read().attributes.get(canonical_path) {
            return Ok(cached.clone());
        }
        let attributes = config.attributes_for(canonical_path, &self.config_path);
        self.state
            .write()
            .attributes
            .insert(canonical_path.to_string(), attributes.clone());
        Ok(attributes)
    }
}
