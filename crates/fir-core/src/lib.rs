//! # fir-core
//!
//! Shared vocabulary for the fir crates:
//!
//! - **Events**: [`Event`], the decoded unit of work sent by a browser or the server
//! - **Patches**: [`Patch`] and [`TemplateRenderer`], the ordered DOM mutations a
//!   handler asks for, and [`DomInstruction`], their wire form
//! - **Outcomes**: [`Outcome`], the single result variant a handler returns
//! - **Errors**: [`FirError`] taxonomy via `thiserror`
//! - **IDs**: [`SessionId`], [`ConnectionId`], [`RequestId`] newtypes
//! - **Logging**: subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod ids;
pub mod logging;
pub mod outcome;
pub mod patch;

pub use errors::{FirError, Result};
pub use event::{Event, LOAD_EVENT};
pub use ids::{ConnectionId, RequestId, SessionId};
pub use outcome::{FieldErrors, Outcome};
pub use patch::{DomInstruction, Op, Patch, PatchList, TemplateRenderer};
