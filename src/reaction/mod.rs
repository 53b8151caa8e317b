//! リアクションサブシステム
//!
//! 受信コメントごとに読み上げ・LLM応答の要否を判定し、単一のFIFOチェーンで
//! キャンセル可能に実行する。

pub mod policy;
pub mod scheduler;
pub mod text;

pub use policy::{PolicyHandle, ReactionPolicy, Replacement};
pub use scheduler::{should_react, ReactionScheduler};
