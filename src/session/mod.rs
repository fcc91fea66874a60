//! Sessions: state, message log, agent directory, and the execution loop.

pub mod agents;
pub mod log;
pub(crate) mod runner;
pub mod state;

pub use agents::{AgentDirectory, AgentProfile};
pub use log::{InMemoryMessageLog, MessageLog};
pub use runner::SessionHandle;
pub use state::{SessionId, SessionPhase, SessionSnapshot};
