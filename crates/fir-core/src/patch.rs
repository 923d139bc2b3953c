//! DOM patch model.
//!
//! A [`Patch`] is one DOM mutation a handler asks for. Template-carrying
//! patches reference a [`TemplateRenderer`] that is resolved against the
//! route's compiled templates at render time; the renderer turns each patch
//! into exactly one [`DomInstruction`], the form sent over the wire.
//!
//! Order inside a [`PatchList`] is part of the contract: an `append` followed
//! by a `remove` of the same selector means something different from the
//! reverse, so nothing here reorders or deduplicates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a named template plus the data to render it with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateRenderer {
    /// Template (or block) name.
    pub name: String,
    /// Render data.
    #[serde(default)]
    pub data: Value,
}

impl TemplateRenderer {
    /// Create a renderer for `name` with `data`.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// One DOM mutation or client control instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Patch {
    /// Replace the element's content, morphing in place.
    Morph {
        /// Target selector.
        selector: String,
        /// Content to render.
        template: TemplateRenderer,
    },
    /// Insert before the target element.
    Before {
        /// Target selector.
        selector: String,
        /// Content to render.
        template: TemplateRenderer,
    },
    /// Insert after the target element.
    After {
        /// Target selector.
        selector: String,
        /// Content to render.
        template: TemplateRenderer,
    },
    /// Append as the target element's last child.
    Append {
        /// Target selector.
        selector: String,
        /// Content to render.
        template: TemplateRenderer,
    },
    /// Prepend as the target element's first child.
    Prepend {
        /// Target selector.
        selector: String,
        /// Content to render.
        template: TemplateRenderer,
    },
    /// Remove the target element.
    Remove {
        /// Target selector.
        selector: String,
    },
    /// Navigate the browser to `url`.
    Navigate {
        /// Destination.
        url: String,
    },
    /// Put `value` into the client store `name`.
    Store {
        /// Store name.
        name: String,
        /// Store value.
        value: Value,
    },
    /// Reload the page.
    Reload,
    /// Reset the form matched by `selector`.
    ResetForm {
        /// Form selector.
        selector: String,
    },
}

impl Patch {
    /// Wire operation for this patch.
    pub fn op(&self) -> Op {
        match self {
            Self::Morph { .. } => Op::Morph,
            Self::Before { .. } => Op::Before,
            Self::After { .. } => Op::After,
            Self::Append { .. } => Op::Append,
            Self::Prepend { .. } => Op::Prepend,
            Self::Remove { .. } => Op::Remove,
            Self::Navigate { .. } => Op::Navigate,
            Self::Store { .. } => Op::Store,
            Self::Reload => Op::Reload,
            Self::ResetForm { .. } => Op::ResetForm,
        }
    }

    /// The template this patch needs rendered, if any.
    pub fn template(&self) -> Option<&TemplateRenderer> {
        match self {
            Self::Morph { template, .. }
            | Self::Before { template, .. }
            | Self::After { template, .. }
            | Self::Append { template, .. }
            | Self::Prepend { template, .. } => Some(template),
            _ => None,
        }
    }

    /// Build the wire instruction, given the rendered html for template patches.
    pub fn to_instruction(&self, html: Option<String>) -> DomInstruction {
        let base = DomInstruction::new(self.op());
        match self {
            Self::Morph { selector, .. }
            | Self::Before { selector, .. }
            | Self::After { selector, .. }
            | Self::Append { selector, .. }
            | Self::Prepend { selector, .. } => DomInstruction {
                selector: Some(selector.clone()),
                html: Some(html.unwrap_or_default()),
                ..base
            },
            Self::Remove { selector } | Self::ResetForm { selector } => DomInstruction {
                selector: Some(selector.clone()),
                ..base
            },
            Self::Navigate { url } => DomInstruction {
                url: Some(url.clone()),
                ..base
            },
            Self::Store { name, value } => DomInstruction {
                name: Some(name.clone()),
                data: Some(value.clone()),
                ..base
            },
            Self::Reload => base,
        }
    }
}

/// Wire operation names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Op {
    /// `morph`
    Morph,
    /// `before`
    Before,
    /// `after`
    After,
    /// `append`
    Append,
    /// `prepend`
    Prepend,
    /// `remove`
    Remove,
    /// `navigate`
    Navigate,
    /// `store`
    Store,
    /// `reload`
    Reload,
    /// `resetForm`
    ResetForm,
}

/// A rendered client instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomInstruction {
    /// Operation.
    pub op: Op,
    /// Target selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Rendered html fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Navigation target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Store name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Store value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DomInstruction {
    /// Instruction with only the op set.
    pub fn new(op: Op) -> Self {
        Self {
            op,
            selector: None,
            html: None,
            url: None,
            name: None,
            data: None,
        }
    }
}

/// Ordered sequence of patches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchList(Vec<Patch>);

impl PatchList {
    /// Empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an arbitrary patch.
    pub fn push(&mut self, patch: Patch) {
        self.0.push(patch);
    }

    /// Add a patch, builder style.
    #[must_use]
    pub fn with(mut self, patch: Patch) -> Self {
        self.0.push(patch);
        self
    }

    /// Morph `selector` with template `name`.
    #[must_use]
    pub fn morph(self, selector: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        self.with(Patch::Morph {
            selector: selector.into(),
            template: TemplateRenderer::new(name, data),
        })
    }

    /// Insert template `name` before `selector`.
    #[must_use]
    pub fn before(self, selector: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        self.with(Patch::Before {
            selector: selector.into(),
            template: TemplateRenderer::new(name, data),
        })
    }

    /// Insert template `name` after `selector`.
    #[must_use]
    pub fn after(self, selector: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        self.with(Patch::After {
            selector: selector.into(),
            template: TemplateRenderer::new(name, data),
        })
    }

    /// Append template `name` inside `selector`.
    #[must_use]
    pub fn append(self, selector: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        self.with(Patch::Append {
            selector: selector.into(),
            template: TemplateRenderer::new(name, data),
        })
    }

    /// Prepend template `name` inside `selector`.
    #[must_use]
    pub fn prepend(
        self,
        selector: impl Into<String>,
        name: impl Into<String>,
        data: Value,
    ) -> Self {
        self.with(Patch::Prepend {
            selector: selector.into(),
            template: TemplateRenderer::new(name, data),
        })
    }

    /// Remove `selector`.
    #[must_use]
    pub fn remove(self, selector: impl Into<String>) -> Self {
        self.with(Patch::Remove {
            selector: selector.into(),
        })
    }

    /// Navigate to `url`.
    #[must_use]
    pub fn navigate(self, url: impl Into<String>) -> Self {
        self.with(Patch::Navigate { url: url.into() })
    }

    /// Store `value` under `name`.
    #[must_use]
    pub fn store(self, name: impl Into<String>, value: Value) -> Self {
        self.with(Patch::Store {
            name: name.into(),
            value,
        })
    }

    /// Reload the page.
    #[must_use]
    pub fn reload(self) -> Self {
        self.with(Patch::Reload)
    }

    /// Reset the form at `selector`.
    #[must_use]
    pub fn reset_form(self, selector: impl Into<String>) -> Self {
        self.with(Patch::ResetForm {
            selector: selector.into(),
        })
    }

    /// Number of patches.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Patch> {
        self.0.iter()
    }

    /// Borrow as a slice.
    pub fn as_slice(&self) -> &[Patch] {
        &self.0
    }

    /// Take the inner vector.
    pub fn into_inner(self) -> Vec<Patch> {
        self.0
    }
}

impl From<Vec<Patch>> for PatchList {
    fn from(patches: Vec<Patch>) -> Self {
        Self(patches)
    }
}

impl IntoIterator for PatchList {
    type Item = Patch;
    type IntoIter = std::vec::IntoIter<Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PatchList {
    type Item = &'a Patch;
    type IntoIter = std::slice::Iter<'a, Patch>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_preserves_append_order() {
        let list = PatchList::new()
            .append("#todos", "todo", json!({"id": 1}))
            .remove("#todo-1")
            .navigate("/done");
        let ops: Vec<Op> = list.iter().map(Patch::op).collect();
        assert_eq!(ops, vec![Op::Append, Op::Remove, Op::Navigate]);
    }

    #[test]
    fn builder_keeps_duplicates() {
        let list = PatchList::new().remove("#a").remove("#a");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn template_only_for_dom_inserts() {
        let morph = Patch::Morph {
            selector: "#a".into(),
            template: TemplateRenderer::new("t", Value::Null),
        };
        assert_eq!(morph.template().map(|t| t.name.as_str()), Some("t"));
        assert!(Patch::Reload.template().is_none());
        assert!(
            Patch::Remove {
                selector: "#a".into()
            }
            .template()
            .is_none()
        );
    }

    #[test]
    fn op_wire_names() {
        let names: Vec<String> = [
            Op::Morph,
            Op::Before,
            Op::After,
            Op::Append,
            Op::Prepend,
            Op::Remove,
            Op::Navigate,
            Op::Store,
            Op::Reload,
            Op::ResetForm,
        ]
        .iter()
        .map(|op| serde_json::to_value(op).unwrap().as_str().unwrap().to_owned())
        .collect();
        assert_eq!(
            names,
            vec![
                "morph",
                "before",
                "after",
                "append",
                "prepend",
                "remove",
                "navigate",
                "store",
                "reload",
                "resetForm"
            ]
        );
    }

    #[test]
    fn instruction_for_template_patch() {
        let patch = Patch::Append {
            selector: "#todos".into(),
            template: TemplateRenderer::new("todo", json!({})),
        };
        let ins = patch.to_instruction(Some("<li>a</li>".into()));
        assert_eq!(
            serde_json::to_value(&ins).unwrap(),
            json!({"op": "append", "selector": "#todos", "html": "<li>a</li>"})
        );
    }

    #[test]
    fn instruction_for_control_patches() {
        let store = Patch::Store {
            name: "fir".into(),
            value: json!({"count": 2}),
        }
        .to_instruction(None);
        assert_eq!(
            serde_json::to_value(&store).unwrap(),
            json!({"op": "store", "name": "fir", "data": {"count": 2}})
        );

        let nav = Patch::Navigate { url: "/".into() }.to_instruction(None);
        assert_eq!(
            serde_json::to_value(&nav).unwrap(),
            json!({"op": "navigate", "url": "/"})
        );

        let reload = Patch::Reload.to_instruction(None);
        assert_eq!(serde_json::to_value(&reload).unwrap(), json!({"op": "reload"}));

        let reset = Patch::ResetForm {
            selector: "#f".into(),
        }
        .to_instruction(None);
        assert_eq!(
            serde_json::to_value(&reset).unwrap(),
            json!({"op": "resetForm", "selector": "#f"})
        );
    }

    #[test]
    fn instruction_roundtrip_from_wire() {
        let ins: DomInstruction =
            serde_json::from_value(json!({"op": "remove", "selector": "#x"})).unwrap();
        assert_eq!(ins.op, Op::Remove);
        assert_eq!(ins.selector.as_deref(), Some("#x"));
        assert!(ins.html.is_none());
    }
}
