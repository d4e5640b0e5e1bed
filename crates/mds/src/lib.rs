//! Scripted markdown documents.
//!
//! A document is markdown with `{{type:name:data}}` placeholders, followed by
//! a `{{{{` separator and a logic payload that runs inside a sandbox. The
//! placeholders become widgets; `run` widgets invoke entry points of the
//! logic, input widgets become call arguments and output widgets receive the
//! results.
//!
//! Typical flow:
//! 1. Pick a [`Runtime`](crate::sandbox::Runtime) (for example
//!    [`QuickJs`](crate::sandbox::quickjs::QuickJs)) and a
//!    [`UiDocument`](crate::ui::UiDocument).
//! 2. Load the source with
//!    [`ScriptDocument::create`](crate::document::ScriptDocument::create).
//! 3. Clicks on `run` widgets (or
//!    [`ScriptDocument::trigger`](crate::document::ScriptDocument::trigger))
//!    invoke the sandbox and write results back.

pub mod binding;
pub mod config;
pub mod document;
pub mod error;
pub mod markup;
pub mod placeholder;
pub mod sandbox;
pub mod ui;
pub mod variable;

pub const TRACE_TARGET_SCRIPT: &str = "mds::script";

pub use config::Config;
pub use document::{DocumentOptions, Phase, ScriptDocument};
pub use error::{BoxError, Error, Result};
pub use markup::{CommonMark, MarkupRenderer};
pub use placeholder::{Variables, extract};
pub use sandbox::{Arguments, Bindings, EntryPoints, LogicPayload, SandboxSession, SessionState};
pub use variable::{Descriptor, VariableType};
