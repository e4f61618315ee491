pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod research;
pub mod search;

// Re-export commonly used types
pub use config::Config;
pub use error::{ModelError, ResearchError};
pub use research::{DeepResearcher, EventSink, ResearchEvent, ResearchOutcome, launch};
