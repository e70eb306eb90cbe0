pub mod buffer;
pub mod identity;
pub mod parser;
pub mod refresh;
pub mod rewriter;
pub mod types;

pub use buffer::BufferState;
pub use parser::parse;
pub use refresh::{PlaylistRefreshController, PlaylistSubscriber, RefreshMetrics, RefreshSettings};
pub use rewriter::{rewrite, rewrite_master, MasterLayout, RewriteConfig};
pub use types::*;
