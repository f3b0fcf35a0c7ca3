//! Judge pipeline: language adapters, template rendering, the sandbox contract,
//! result aggregation and the orchestrator tying them together.

pub mod adapters;
pub mod aggregator;
pub mod orchestrator;
pub mod renderer;
pub mod sandbox;

pub use adapters::{AdapterRegistry, LanguageAdapter};
pub use aggregator::aggregate;
pub use orchestrator::{Orchestrator, MAX_SOURCE_CODE_BYTES};
pub use renderer::{RenderedUnit, TemplateRenderer};
pub use sandbox::{RawExecution, Sandbox, SANDBOX_LABEL};
