//! Per-route template configuration and source resolution.
//!
//! Each template option is either a loader path or inline markup: a value
//! naming an existing file is read through the loader, anything else is used
//! as the template source itself. Partial entries name files or directories;
//! directories contribute every file with a configured extension.

use fir_core::{FirError, Result};

use crate::actions::ActionRegistry;
use crate::functions::FunctionMap;
use crate::loader::TemplateLoader;

/// Name of the page layout template.
pub const LAYOUT: &str = "layout";
/// Default name the layout includes the content under.
pub const CONTENT: &str = "content";
/// Name of the error layout template.
pub const ERROR_LAYOUT: &str = "error_layout";
/// Name of the error content template.
pub const ERROR: &str = "error";

/// Error content used when a route configures none.
pub const DEFAULT_ERROR_CONTENT: &str =
    r#"<div class="fir-error" data-code="{{ error.code }}">{{ error.message }}</div>"#;

/// Template options for one route.
#[derive(Clone, Debug)]
pub struct TemplateConfig {
    /// Page layout; includes the content via `{% include "content" %}`.
    pub layout: Option<String>,
    /// Page content.
    pub content: Option<String>,
    /// Name the content is registered under for the layout to include.
    pub layout_content_name: String,
    /// Layout for error pages; defaults to `layout`.
    pub error_layout: Option<String>,
    /// Error content, rendered with `{error: {code, message}}`.
    pub error_content: Option<String>,
    /// Partial files or directories.
    pub partials: Vec<String>,
    /// Extensions picked up from partial directories.
    pub extensions: Vec<String>,
    /// Route functions layered over the defaults.
    pub functions: FunctionMap,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            layout: None,
            content: None,
            layout_content_name: CONTENT.to_owned(),
            error_layout: None,
            error_content: None,
            partials: Vec::new(),
            extensions: vec![".html".to_owned()],
            functions: FunctionMap::new(),
        }
    }
}

impl TemplateConfig {
    /// Whether the route renders anything at all.
    pub fn has_page(&self) -> bool {
        self.layout.is_some() || self.content.is_some()
    }
}

/// Which environment a template is compiled into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Page layout, content and partials.
    Page,
    /// Error layout and error content (plus partials).
    Error,
}

/// Translated sources ready to compile.
#[derive(Clone, Debug, Default)]
pub struct TemplateSources {
    /// `(scope, name, source)` in registration order.
    pub templates: Vec<(Scope, String, String)>,
    /// Name the content is registered under.
    pub content_name: String,
}

impl TemplateSources {
    /// Whether `name` is registered in `scope`.
    pub fn contains(&self, scope: Scope, name: &str) -> bool {
        self.templates
            .iter()
            .any(|(s, n, _)| *s == scope && n == name)
    }

    fn push(&mut self, scope: Scope, name: &str, source: &str) {
        self.templates
            .push((scope, name.to_owned(), source.to_owned()));
    }
}

/// Load every source `config` names and run the markup translator over it.
pub fn resolve_sources(
    config: &TemplateConfig,
    loader: &dyn TemplateLoader,
    actions: &ActionRegistry,
) -> Result<TemplateSources> {
    let content_name = config.layout_content_name.as_str();
    let mut sources = TemplateSources {
        templates: Vec::new(),
        content_name: content_name.to_owned(),
    };

    let mut partials = Vec::new();
    for entry in &config.partials {
        if loader.is_dir(entry) {
            for path in loader.list(entry, &config.extensions)? {
                partials.push((strip_extension(&path, &config.extensions), path));
            }
        } else if loader.exists(entry) {
            partials.push((strip_extension(entry, &config.extensions), entry.clone()));
        } else {
            return Err(FirError::template(format!("partial '{entry}' not found")));
        }
    }
    let mut loaded = Vec::with_capacity(partials.len());
    for (name, path) in partials {
        let source = translate(&path, &loader.read(&path)?, actions)?;
        loaded.push((name, source));
    }

    let layout = load_option(config.layout.as_deref(), LAYOUT, loader, actions)?;
    let content = load_option(config.content.as_deref(), content_name, loader, actions)?;
    let error_layout = match config.error_layout.as_deref() {
        Some(value) => Some(load_value(value, ERROR_LAYOUT, loader, actions)?),
        None => layout.clone(),
    };
    let error_content = match config.error_content.as_deref() {
        Some(value) => load_value(value, ERROR, loader, actions)?,
        None => DEFAULT_ERROR_CONTENT.to_owned(),
    };

    for scope in [Scope::Page, Scope::Error] {
        for (name, source) in &loaded {
            sources.push(scope, name, source);
        }
    }
    if let Some(content) = &content {
        sources.push(Scope::Page, content_name, content);
    }
    if let Some(layout) = &layout {
        sources.push(Scope::Page, LAYOUT, layout);
    }
    sources.push(Scope::Error, ERROR, &error_content);
    if content_name != ERROR {
        sources.push(Scope::Error, content_name, &error_content);
    }
    if let Some(error_layout) = &error_layout {
        sources.push(Scope::Error, ERROR_LAYOUT, error_layout);
    }

    Ok(sources)
}

fn load_option(
    value: Option<&str>,
    name: &str,
    loader: &dyn TemplateLoader,
    actions: &ActionRegistry,
) -> Result<Option<String>> {
    value
        .map(|v| load_value(v, name, loader, actions))
        .transpose()
}

fn load_value(
    value: &str,
    name: &str,
    loader: &dyn TemplateLoader,
    actions: &ActionRegistry,
) -> Result<String> {
    if loader.exists(value) {
        translate(value, &loader.read(value)?, actions)
    } else {
        translate(name, value, actions)
    }
}

fn translate(origin: &str, source: &str, actions: &ActionRegistry) -> Result<String> {
    actions
        .translate_markup(source)
        .map_err(|e| FirError::template(format!("{origin}: {e}")))
}

fn strip_extension(path: &str, extensions: &[String]) -> String {
    extensions
        .iter()
        .find_map(|ext| path.strip_suffix(ext.as_str()))
        .unwrap_or(path)
        .trim_start_matches("./")
        .to_owned()
}
