//! # fir-template
//!
//! Templates for fir routes:
//!
//! - [`loader`]: where sources come from ([`FsLoader`], [`MemoryLoader`])
//! - [`actions`]: load-time rewrite of `x-fir-*` attributes into `@fir:` bindings
//! - [`engine`]: compiled [`TemplateSet`]s and the [`TemplateEngine`] trait
//! - [`cache`]: fingerprint-keyed [`TemplateCache`]
//! - [`route`]: reloadable [`RouteTemplates`]
//! - [`render`]: patch lists to wire instructions

#![deny(unsafe_code)]

pub mod actions;
pub mod cache;
pub mod config;
pub mod engine;
pub mod functions;
pub mod loader;
pub mod render;
pub mod route;

pub use actions::{ActionError, ActionInfo, ActionRegistry, ActionTranslator, AliasMap};
pub use cache::TemplateCache;
pub use config::{CONTENT, ERROR, ERROR_LAYOUT, LAYOUT, TemplateConfig};
pub use engine::{CompiledTemplate, TemplateEngine, TemplateSet, escape_html};
pub use functions::{ERRORS_KEY, FunctionMap, TemplateFunction, default_functions, merge_functions};
pub use loader::{FsLoader, MemoryLoader, TemplateLoader};
pub use render::{render_patch, render_patches};
pub use route::RouteTemplates;

pub use minijinja::Value as TemplateValue;
