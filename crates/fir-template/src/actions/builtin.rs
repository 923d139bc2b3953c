//! Built-in `x-fir-*` action translators.

use super::{ActionError, ActionInfo, ActionTranslator, AliasMap, binding, js_string};

/// Every built-in translator.
pub(crate) fn builtin() -> Vec<Box<dyn ActionTranslator>> {
    vec![
        Box::new(Fixed::new("refresh", 10, "$fir.replace()", &[])),
        Box::new(Fixed::new("remove", 20, "$fir.removeEl()", &[])),
        Box::new(Fixed::new("remove-parent", 30, "$fir.removeParentEl()", &[])),
        Box::new(InsertTemplate::new("append", 40, "$fir.appendEl()")),
        Box::new(InsertTemplate::new("prepend", 50, "$fir.prependEl()")),
        Box::new(Fixed::new("reset", 60, "$el.reset()", &["nohtml"])),
        Box::new(Fixed::new("toggle-disabled", 70, "$fir.toggleDisabled()", &[])),
        Box::new(ToggleClass),
        Box::new(Dispatch),
        Box::new(RunJs),
        Box::new(Redirect),
    ]
}

/// Actions with a fixed expression and no argument.
struct Fixed {
    name: &'static str,
    precedence: u32,
    js: &'static str,
    modifiers: &'static [&'static str],
}

impl Fixed {
    const fn new(
        name: &'static str,
        precedence: u32,
        js: &'static str,
        modifiers: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            precedence,
            js,
            modifiers,
        }
    }
}

impl ActionTranslator for Fixed {
    fn name(&self) -> &'static str {
        self.name
    }

    fn precedence(&self) -> u32 {
        self.precedence
    }

    fn translate(&self, info: &ActionInfo, _aliases: &AliasMap) -> Result<String, ActionError> {
        info.reject_arg()?;
        Ok(binding(&info.spec, None, self.modifiers, self.js))
    }
}

/// `append:<tmpl>` / `prepend:<tmpl>`: insert the rendered template.
struct InsertTemplate {
    name: &'static str,
    precedence: u32,
    js: &'static str,
}

impl InsertTemplate {
    const fn new(name: &'static str, precedence: u32, js: &'static str) -> Self {
        Self {
            name,
            precedence,
            js,
        }
    }
}

impl ActionTranslator for InsertTemplate {
    fn name(&self) -> &'static str {
        self.name
    }

    fn precedence(&self) -> u32 {
        self.precedence
    }

    fn translate(&self, info: &ActionInfo, _aliases: &AliasMap) -> Result<String, ActionError> {
        let template = info.require_arg()?;
        Ok(binding(&info.spec, Some(template), &[], self.js))
    }
}

struct ToggleClass;

impl ActionTranslator for ToggleClass {
    fn name(&self) -> &'static str {
        "toggle-class"
    }

    fn precedence(&self) -> u32 {
        80
    }

    fn translate(&self, info: &ActionInfo, _aliases: &AliasMap) -> Result<String, ActionError> {
        let class = info.require_arg()?;
        let js = format!("$fir.toggleClass({})", js_string(class));
        Ok(binding(&info.spec, None, &[], &js))
    }
}

struct Dispatch;

impl ActionTranslator for Dispatch {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn precedence(&self) -> u32 {
        90
    }

    fn translate(&self, info: &ActionInfo, _aliases: &AliasMap) -> Result<String, ActionError> {
        let event = info.require_arg()?;
        let js = format!("$dispatch({})", js_string(event));
        Ok(binding(&info.spec, None, &["nohtml"], &js))
    }
}

/// `runjs:<alias>`: the body of `x-fir-action-<alias>` on the same element.
struct RunJs;

impl ActionTranslator for RunJs {
    fn name(&self) -> &'static str {
        "runjs"
    }

    fn precedence(&self) -> u32 {
        100
    }

    fn translate(&self, info: &ActionInfo, aliases: &AliasMap) -> Result<String, ActionError> {
        let alias = info.require_arg()?;
        let body = aliases
            .get(alias)
            .ok_or_else(|| ActionError::MissingAlias {
                alias: alias.to_owned(),
            })?;
        Ok(binding(&info.spec, None, &[], body))
    }
}

/// `redirect[:<url>]`: navigate once the event settles; defaults to `/`.
struct Redirect;

impl ActionTranslator for Redirect {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn precedence(&self) -> u32 {
        110
    }

    fn translate(&self, info: &ActionInfo, _aliases: &AliasMap) -> Result<String, ActionError> {
        let url = info.arg.as_deref().filter(|u| !u.is_empty()).unwrap_or("/");
        let js = format!("$fir.redirect({})", js_string(url));
        Ok(binding(&info.spec, None, &["nohtml"], &js))
    }
}
