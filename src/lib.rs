//! Cadence: an agent session execution engine.
//!
//! Drives many concurrent LLM conversations ("sessions") through a
//! turn-taking loop: stream a model response, accumulate it into a message,
//! run or delegate the requested tools, feed results back, repeat. A shared
//! event bus carries lifecycle events out and control signals in. An anomaly
//! detector watches the bus and an intervention orchestrator nudges sessions
//! that stall or loop.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cadence::prelude::*;
//!
//! # async fn example() -> cadence::error::Result<()> {
//! let llm = Arc::new(ScriptedLlm::default());
//! let engine = Engine::builder(llm).build()?;
//!
//! let session = engine.create_session();
//! engine.start(session, "Hello!")?;
//! engine
//!     .wait_for(session, |s| s.turn_index >= 1, Duration::from_secs(10))
//!     .await?;
//! for message in engine.messages(session)? {
//!     println!("{:?}: {}", message.role, message.text());
//! }
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod bus;
pub mod channel;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod intervention;
pub mod llm;
pub mod prelude;
pub mod session;
pub mod tools;
pub mod types;
pub mod util;
