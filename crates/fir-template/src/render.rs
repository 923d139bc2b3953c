//! Patch rendering.
//!
//! Turns a [`PatchList`] into wire instructions, one per patch and in the
//! same order. Template patches are rendered through a [`TemplateEngine`];
//! pass a [`TemplateSet`](crate::TemplateSet) snapshot so one list never
//! straddles a reload.

use fir_core::{DomInstruction, Patch, PatchList, Result};

use crate::engine::TemplateEngine;

/// Render one patch.
pub fn render_patch<E: TemplateEngine + ?Sized>(engine: &E, patch: &Patch) -> Result<DomInstruction> {
    let html = match patch.template() {
        Some(template) => Some(engine.execute_template(&template.name, &template.data)?),
        None => None,
    };
    Ok(patch.to_instruction(html))
}

/// Render every patch in order. The first failure aborts the list.
pub fn render_patches<E: TemplateEngine + ?Sized>(
    engine: &E,
    patches: &PatchList,
) -> Result<Vec<DomInstruction>> {
    patches.iter().map(|p| render_patch(engine, p)).collect()
}
