//! Live activity feed client for an AI-usage cost-tracking backend.

pub mod config;
pub mod error;
pub mod event;
pub mod export;
pub mod frame;
pub mod render;
pub mod session;
pub mod source;

pub use config::{AppConfig, FeedConfig};
pub use error::{FeedError, Result};
pub use event::{ActivityEvent, EventFeed, Severity};
pub use session::{FeedSession, FeedState, FeedStats, FeedUpdate};
pub use source::{ChunkReader, EventSource, HttpEventSource};
