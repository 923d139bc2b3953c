//! Compiled template sets.
//!
//! A [`TemplateSet`] is one route's compiled templates: a page environment
//! (layout, content, partials) and an error environment (error layout,
//! error content, partials), both with HTML auto-escaping and the route's
//! function map. Sets are immutable once compiled and cheap to clone, so a
//! render holds its own snapshot while a reload swaps in a new set.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use fir_core::{FirError, Result};
use minijinja::{AutoEscape, Environment, Value};
use regex::Regex;
use serde::Serialize;

use crate::config::{ERROR, ERROR_LAYOUT, LAYOUT, Scope, TemplateSources};
use crate::functions::FunctionMap;

static BLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%-?\s*block\s+([A-Za-z_][A-Za-z0-9_]*)\s*-?%\}").expect("block pattern")
});

/// Named-template rendering.
pub trait TemplateEngine: Send + Sync {
    /// Render the template or block `name` with `data`.
    fn execute_template(&self, name: &str, data: &serde_json::Value) -> Result<String>;

    /// Look up the template or block `name`.
    fn get_template(&self, name: &str) -> Result<CompiledTemplate>;
}

struct SetInner {
    pages: Environment<'static>,
    errors: Environment<'static>,
    names: BTreeSet<(Scope, String)>,
    /// block name → (scope, defining template)
    blocks: BTreeMap<String, (Scope, String)>,
    content_name: String,
    fingerprint: String,
}

/// One route's compiled templates.
#[derive(Clone)]
pub struct TemplateSet {
    inner: Arc<SetInner>,
}

impl std::fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSet")
            .field("fingerprint", &self.inner.fingerprint)
            .field("templates", &self.inner.names.len())
            .field("blocks", &self.inner.blocks.len())
            .finish_non_exhaustive()
    }
}

impl TemplateSet {
    /// Compile translated `sources` with `functions`.
    pub fn compile(
        sources: &TemplateSources,
        functions: &FunctionMap,
        fingerprint: impl Into<String>,
    ) -> Result<Self> {
        let mut pages = new_environment(functions);
        let mut errors = new_environment(functions);
        let mut names = BTreeSet::new();
        let mut blocks = BTreeMap::new();

        for (scope, name, source) in &sources.templates {
            let env = match scope {
                Scope::Page => &mut pages,
                Scope::Error => &mut errors,
            };
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|e| FirError::template(format!("{name}: {e}")))?;
            let _ = names.insert((*scope, name.clone()));
            for capture in BLOCK_PATTERN.captures_iter(source) {
                let _ = blocks
                    .entry(capture[1].to_owned())
                    .or_insert_with(|| (*scope, name.clone()));
            }
        }

        Ok(Self {
            inner: Arc::new(SetInner {
                pages,
                errors,
                names,
                blocks,
                content_name: sources.content_name.clone(),
                fingerprint: fingerprint.into(),
            }),
        })
    }

    /// Fingerprint this set was compiled for.
    pub fn fingerprint(&self) -> &str {
        &self.inner.fingerprint
    }

    /// Whether two handles share one compiled set.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the set can render a page.
    pub fn has_page(&self) -> bool {
        self.has(Scope::Page, LAYOUT) || self.has(Scope::Page, &self.inner.content_name)
    }

    /// Render the full page: the layout if there is one, else the content.
    pub fn render_page<S: Serialize>(&self, data: &S) -> Result<String> {
        let name = if self.has(Scope::Page, LAYOUT) {
            LAYOUT
        } else {
            self.inner.content_name.as_str()
        };
        self.render_in(Scope::Page, name, None, data)
    }

    /// Render the content template alone.
    pub fn render_content<S: Serialize>(&self, data: &S) -> Result<String> {
        self.render_in(Scope::Page, &self.inner.content_name, None, data)
    }

    /// Render the full error page.
    pub fn render_error_page<S: Serialize>(&self, data: &S) -> Result<String> {
        let name = if self.has(Scope::Error, ERROR_LAYOUT) {
            ERROR_LAYOUT
        } else {
            ERROR
        };
        self.render_in(Scope::Error, name, None, data)
    }

    /// Render the error content alone.
    pub fn render_error<S: Serialize>(&self, data: &S) -> Result<String> {
        self.render_in(Scope::Error, ERROR, None, data)
    }

    /// Names of every template and block, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut all: BTreeSet<String> = self.inner.names.iter().map(|(_, n)| n.clone()).collect();
        all.extend(self.inner.blocks.keys().cloned());
        all.into_iter().collect()
    }

    fn has(&self, scope: Scope, name: &str) -> bool {
        self.inner.names.contains(&(scope, name.to_owned()))
    }

    fn lookup(&self, name: &str) -> Option<(Scope, String, Option<String>)> {
        if self.has(Scope::Page, name) {
            return Some((Scope::Page, name.to_owned(), None));
        }
        if self.has(Scope::Error, name) {
            return Some((Scope::Error, name.to_owned(), None));
        }
        self.inner
            .blocks
            .get(name)
            .map(|(scope, template)| (*scope, template.clone(), Some(name.to_owned())))
    }

    fn render_in<S: Serialize>(
        &self,
        scope: Scope,
        template: &str,
        block: Option<&str>,
        data: &S,
    ) -> Result<String> {
        let env = match scope {
            Scope::Page => &self.inner.pages,
            Scope::Error => &self.inner.errors,
        };
        let display = block.unwrap_or(template);
        let tmpl = env
            .get_template(template)
            .map_err(|_| FirError::not_found(format!("template '{display}'")))?;
        let ctx = Value::from_serialize(data);
        let rendered = match block {
            None => tmpl.render(ctx),
            Some(block) => tmpl
                .eval_to_state(ctx)
                .and_then(|mut state| state.render_block(block)),
        };
        rendered.map_err(|e| FirError::render(display, render_message(&e)))
    }
}

impl TemplateEngine for TemplateSet {
    fn execute_template(&self, name: &str, data: &serde_json::Value) -> Result<String> {
        self.get_template(name)?.render(data)
    }

    fn get_template(&self, name: &str) -> Result<CompiledTemplate> {
        let (scope, template, block) = self
            .lookup(name)
            .ok_or_else(|| FirError::not_found(format!("template '{name}'")))?;
        Ok(CompiledTemplate {
            set: self.clone(),
            scope,
            template,
            block,
        })
    }
}

/// A resolved template or block, bound to the set it came from.
#[derive(Clone, Debug)]
pub struct CompiledTemplate {
    set: TemplateSet,
    scope: Scope,
    template: String,
    block: Option<String>,
}

impl CompiledTemplate {
    /// Name it was looked up by.
    pub fn name(&self) -> &str {
        self.block.as_deref().unwrap_or(&self.template)
    }

    /// Template that defines it.
    pub fn template_name(&self) -> &str {
        &self.template
    }

    /// Whether it is a block inside another template.
    pub fn is_block(&self) -> bool {
        self.block.is_some()
    }

    /// Render with `data`.
    pub fn render<S: Serialize>(&self, data: &S) -> Result<String> {
        self.set
            .render_in(self.scope, &self.template, self.block.as_deref(), data)
    }
}

/// Escape `text` the way autoescaped templates do.
pub fn escape_html(text: &str) -> String {
    minijinja::HtmlEscape(text).to_string()
}

fn new_environment(functions: &FunctionMap) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    for (name, function) in functions {
        env.add_global(name.clone(), function.value().clone());
    }
    env
}

fn render_message(err: &minijinja::Error) -> String {
    match err.detail() {
        Some(detail) => format!("{}: {detail}", err.kind()),
        None => err.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::config::{TemplateConfig, resolve_sources};
    use crate::functions::default_functions;
    use crate::loader::MemoryLoader;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn compile(config: &TemplateConfig, loader: &MemoryLoader) -> TemplateSet {
        let sources = resolve_sources(config, loader, &ActionRegistry::default()).unwrap();
        TemplateSet::compile(&sources, &default_functions(), "test").unwrap()
    }

    fn todo_set() -> TemplateSet {
        let loader = MemoryLoader::new()
            .with(
                "layout.html",
                r#"<html><body>{% include "content" %}</body></html>"#,
            )
            .with(
                "index.html",
                r#"<ul>{% for t in todos %}{% include "partials/todo" %}{% endfor %}</ul>{% block count %}<b>{{ todos|length }}</b>{% endblock %}"#,
            )
            .with("partials/todo.html", "<li>{{ t }}</li>");
        compile(
            &TemplateConfig {
                layout: Some("layout.html".into()),
                content: Some("index.html".into()),
                partials: vec!["partials".into()],
                ..TemplateConfig::default()
            },
            &loader,
        )
    }

    #[test]
    fn renders_page_through_layout() {
        let html = todo_set().render_page(&json!({"todos": ["a", "b"]})).unwrap();
        assert_eq!(
            html,
            "<html><body><ul><li>a</li><li>b</li></ul><b>2</b></body></html>"
        );
    }

    #[test]
    fn renders_content_alone() {
        let html = todo_set().render_content(&json!({"todos": ["a"]})).unwrap();
        assert_eq!(html, "<ul><li>a</li></ul><b>1</b>");
    }

    #[test]
    fn partials_and_blocks_by_name() {
        let set = todo_set();
        assert_eq!(
            set.execute_template("partials/todo", &json!({"t": 3})).unwrap(),
            "<li>3</li>"
        );
        let block = set.get_template("count").unwrap();
        assert!(block.is_block());
        assert_eq!(block.name(), "count");
        assert_eq!(block.template_name(), "content");
        assert!(set.names().contains(&"count".to_owned()));
        assert_eq!(
            block.render(&json!({"todos": ["x", "y"]})).unwrap(),
            "<b>2</b>"
        );
    }

    #[test]
    fn html_is_escaped() {
        let html = todo_set()
            .execute_template("partials/todo", &json!({"t": "<script>"}))
            .unwrap();
        assert_eq!(html, "<li>&lt;script&gt;</li>");
    }

    #[test]
    fn unknown_template_is_not_found() {
        assert_matches!(
            todo_set().execute_template("nope", &json!({})),
            Err(FirError::NotFound { .. })
        );
    }

    #[test]
    fn render_failure_is_render_error() {
        let set = compile(
            &TemplateConfig {
                content: Some("{{ missing.field.deeper }}".into()),
                ..TemplateConfig::default()
            },
            &MemoryLoader::new(),
        );
        assert_matches!(
            set.render_content(&json!({})),
            Err(FirError::Render { template, .. }) if template == "content"
        );
    }

    #[test]
    fn syntax_error_fails_compile() {
        let sources = resolve_sources(
            &TemplateConfig {
                content: Some("{% if %}".into()),
                ..TemplateConfig::default()
            },
            &MemoryLoader::new(),
            &ActionRegistry::default(),
        )
        .unwrap();
        let err = TemplateSet::compile(&sources, &default_functions(), "x").unwrap_err();
        assert!(err.is_fatal_at_load());
    }

    #[test]
    fn error_page_uses_layout_and_error_content() {
        let set = todo_set();
        let data = json!({"error": {"code": "NOT_FOUND", "message": "gone"}});
        assert_eq!(
            set.render_error_page(&data).unwrap(),
            r#"<html><body><div class="fir-error" data-code="NOT_FOUND">gone</div></body></html>"#
        );
        assert_eq!(
            set.render_error(&data).unwrap(),
            r#"<div class="fir-error" data-code="NOT_FOUND">gone</div>"#
        );
    }

    #[test]
    fn rendering_is_idempotent() {
        let set = todo_set();
        let data = json!({"todos": ["a", "<b>"]});
        let first = set.render_page(&data).unwrap();
        let second = set.render_page(&data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn field_errors_reach_templates() {
        let set = compile(
            &TemplateConfig {
                content: Some(r#"<input name="email"><span>{{ fir_error("email") }}</span>"#.into()),
                ..TemplateConfig::default()
            },
            &MemoryLoader::new(),
        );
        let html = set
            .render_content(&json!({"errors": {"email": "is required"}}))
            .unwrap();
        assert!(html.contains("<span>is required</span>"));
    }
}
