//! Load-time rewrite of `x-fir-*` attributes into `@fir:` event bindings.
//!
//! ```text
//! x-fir-<action>[:<arg>]="<event-spec>"   ->   @fir:<key>[::tmpl][.mods]="<js>"
//! ```
//!
//! Each action is handled by an [`ActionTranslator`]. When one element
//! carries several actions they run in ascending precedence, source order
//! breaking ties, and each appends one binding to the tag. Attributes of the
//! form `x-fir-action-<alias>="<js>"` define aliases for `x-fir-runjs:<alias>`
//! and are consumed by the rewrite.
//!
//! The rewrite runs once per template source before compilation; any error
//! fails compilation of that template.

mod builtin;
mod scanner;
pub mod spec;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use self::scanner::{Piece, StartTag};
pub use self::spec::{EventEntry, EventSpec, EventState};

const ACTION_PREFIX: &str = "x-fir-";
const ALIAS_PREFIX: &str = "x-fir-action-";

/// Alias name → JS body, per element.
pub type AliasMap = BTreeMap<String, String>;

/// Markup translation failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    /// No translator is registered for the action.
    #[error("unknown action 'x-fir-{action}'")]
    UnknownAction {
        /// Action name.
        action: String,
    },
    /// The attribute value is not a valid event spec.
    #[error("invalid event spec '{spec}': {reason}")]
    InvalidEventSpec {
        /// Attribute value as written.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The action needs a `:<arg>` and has none.
    #[error("action 'x-fir-{action}' requires an argument")]
    MissingArgument {
        /// Action name.
        action: String,
    },
    /// The action takes no `:<arg>`.
    #[error("action 'x-fir-{action}' takes no argument")]
    UnexpectedArgument {
        /// Action name.
        action: String,
    },
    /// `runjs` names an alias the element does not define.
    #[error("no x-fir-action-{alias} defined for runjs")]
    MissingAlias {
        /// Alias name.
        alias: String,
    },
}

/// One `x-fir-*` attribute, parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionInfo {
    /// Action name (`redirect`, `append`, ...).
    pub action: String,
    /// Literal argument after the colon, unquoted.
    pub arg: Option<String>,
    /// Parsed attribute value.
    pub spec: EventSpec,
}

impl ActionInfo {
    /// The argument, or [`ActionError::MissingArgument`].
    pub fn require_arg(&self) -> Result<&str, ActionError> {
        self.arg
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ActionError::MissingArgument {
                action: self.action.clone(),
            })
    }

    /// [`ActionError::UnexpectedArgument`] when an argument is present.
    pub fn reject_arg(&self) -> Result<(), ActionError> {
        match self.arg {
            Some(_) => Err(ActionError::UnexpectedArgument {
                action: self.action.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Translates one action into a complete `@fir:` binding attribute.
pub trait ActionTranslator: Send + Sync {
    /// Action name matched against `x-fir-<name>`.
    fn name(&self) -> &'static str;
    /// Lower runs first on an element.
    fn precedence(&self) -> u32;
    /// Produce the binding, e.g. `@fir:delete:ok.nohtml="$fir.redirect('/')"`.
    fn translate(&self, info: &ActionInfo, aliases: &AliasMap) -> Result<String, ActionError>;
}

/// Set of translators keyed by action name.
pub struct ActionRegistry {
    translators: HashMap<&'static str, Box<dyn ActionTranslator>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for translator in builtin::builtin() {
            registry.register(translator);
        }
        registry
    }
}

impl ActionRegistry {
    /// Registry with no translators.
    pub fn empty() -> Self {
        Self {
            translators: HashMap::new(),
        }
    }

    /// Add or replace the translator for its action name.
    pub fn register(&mut self, translator: Box<dyn ActionTranslator>) {
        let _ = self.translators.insert(translator.name(), translator);
    }

    /// Registered action names, sorted by precedence.
    pub fn actions(&self) -> Vec<&'static str> {
        let mut all: Vec<_> = self.translators.values().collect();
        all.sort_by_key(|t| t.precedence());
        all.iter().map(|t| t.name()).collect()
    }

    /// Rewrite every start tag in `source` that carries `x-fir-*` attributes.
    pub fn translate_markup(&self, source: &str) -> Result<String, ActionError> {
        let mut out = String::with_capacity(source.len());
        for piece in scanner::scan(source) {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Tag(tag) => out.push_str(&self.rewrite_tag(&tag)?),
            }
        }
        Ok(out)
    }

    fn rewrite_tag<'a>(&self, tag: &StartTag<'a>) -> Result<Cow<'a, str>, ActionError> {
        let is_fir = |name: &str| name.starts_with(ACTION_PREFIX);
        if !tag
            .segments
            .iter()
            .any(|s| s.attr.as_ref().is_some_and(|a| is_fir(a.name)))
        {
            return Ok(Cow::Borrowed(tag.raw));
        }

        let mut aliases = AliasMap::new();
        for attr in tag.segments.iter().filter_map(|s| s.attr.as_ref()) {
            if let Some(alias) = attr.name.strip_prefix(ALIAS_PREFIX) {
                let _ = aliases.insert(alias.to_owned(), attr.value.unwrap_or_default().to_owned());
            }
        }

        let mut actions = Vec::new();
        for attr in tag.segments.iter().filter_map(|s| s.attr.as_ref()) {
            if attr.name.starts_with(ALIAS_PREFIX) {
                continue;
            }
            let Some(rest) = attr.name.strip_prefix(ACTION_PREFIX) else {
                continue;
            };
            let (action, arg) = match rest.split_once(':') {
                Some((action, arg)) => (action, Some(unquote(arg).to_owned())),
                None => (rest, None),
            };
            let translator =
                self.translators
                    .get(action)
                    .ok_or_else(|| ActionError::UnknownAction {
                        action: action.to_owned(),
                    })?;
            let info = ActionInfo {
                action: action.to_owned(),
                arg,
                spec: EventSpec::parse(attr.value.unwrap_or_default())?,
            };
            actions.push((translator, info));
        }
        actions.sort_by_key(|(translator, _)| translator.precedence());

        let mut out = String::with_capacity(tag.raw.len() + 64);
        out.push('<');
        out.push_str(tag.name);
        for segment in &tag.segments {
            if segment.attr.as_ref().is_some_and(|a| is_fir(a.name)) {
                continue;
            }
            out.push_str(segment.raw);
        }
        for (translator, info) in &actions {
            out.push(' ');
            out.push_str(&translator.translate(info, &aliases)?);
        }
        out.push_str(tag.close);
        Ok(Cow::Owned(out))
    }
}

/// Format a binding attribute.
///
/// Modifiers are the event spec's own followed by `extra` ones not already present.
pub fn binding(spec: &EventSpec, template: Option<&str>, extra: &[&str], js: &str) -> String {
    let mut out = format!("@fir:{}", spec.key());
    if let Some(template) = template {
        out.push_str("::");
        out.push_str(template);
    }
    for modifier in &spec.modifiers {
        out.push('.');
        out.push_str(modifier);
    }
    for modifier in extra {
        if !spec.modifiers.iter().any(|m| m == modifier) {
            out.push('.');
            out.push_str(modifier);
        }
    }
    out.push_str("=\"");
    out.push_str(&js.replace('"', "&quot;"));
    out.push('"');
    out
}

/// Single-quoted JS string literal.
pub fn js_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn unquote(arg: &str) -> &str {
    let bytes = arg.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(b'"'), Some(b'"')) | (Some(b'\''), Some(b'\'')) if bytes.len() >= 2 => {
            &arg[1..arg.len() - 1]
        }
        _ => arg,
    }
}
