//! Grounded legal research over web sources.
//!
//! counsel-core answers natural-language legal questions by routing each query
//! to a pipeline tier (or a direct answer), searching and extracting sources,
//! grounding structured entities and claims in the retrieved URLs, and
//! composing a cited answer that never references a source the run did not
//! actually retrieve.
//!
//! The main entry point is [`Researcher::answer`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use counsel_core::admission::{AdmissionConfig, InProcessAdmission};
//! use counsel_core::pipeline::EngineConfig;
//! use counsel_core::provider::{
//!     AnthropicGeneration, GenerationConfig, TavilySearch, TavilySearchConfig,
//! };
//! use counsel_core::{Query, Researcher};
//!
//! # async fn run() -> counsel_core::Result<()> {
//! let search = Arc::new(TavilySearch::new(TavilySearchConfig::new("tvly-..."))?);
//! let llm = Arc::new(AnthropicGeneration::new(GenerationConfig::new("sk-ant-..."))?);
//! let admission = Arc::new(InProcessAdmission::new(AdmissionConfig::default()));
//!
//! let researcher = Researcher::new(search, llm, admission, EngineConfig::default());
//! let output = researcher
//!     .answer("user-1", Query::new("Find cases on adverse possession", "Zimbabwe"))
//!     .await?;
//! println!("{}", output.response);
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod classify;
pub mod enhance;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod query;
pub mod researcher;
pub mod tokens;

pub use classify::{ComplexityClassifier, Route, RouteDecision};
pub use error::{Error, Result};
pub use pipeline::{RunOutput, SourceRef, Tier};
pub use progress::{ProgressSink, RunEvent, RunEventKind};
pub use query::{ChatRole, ConversationTurn, Query};
pub use researcher::Researcher;
