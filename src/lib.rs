pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod reaction;
pub mod supervisor;
pub mod voice;

// Re-export the main error types for convenience
pub use error::{KomochiError, KomochiResult};

// Re-export core types for convenience
pub use chat::protocol::WorkerMessage;
pub use chat::{Comment, CommentKind, CommentPart};
pub use reaction::{PolicyHandle, ReactionPolicy, ReactionScheduler};
pub use supervisor::{ChatEvent, ChatSupervisor, SupervisorConfig};
