//! Tool collaborator: capability records resolved by name.

pub mod arguments;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use registry::{ToolOutput, ToolRegistry};
pub use tool::{FnTool, Tool, ToolExecutionContext, ToolValue};
pub use types::{ToolParameters, ToolSchema};
pub use validation::validate_arguments;
