//! Dual-agent battle orchestration
//!
//! A battle runs the Traditional and Ralph Loop agents against the same task in
//! rounds. Each round launches one [`AgentRunController`] per pending agent and
//! joins on all of them before the [`BattleLoop`] decides what comes next.

mod arena;
mod buffer;
mod controller;
mod scheduler;
mod session;
mod store;
mod summary;

pub use arena::{Arena, ArenaOptions, ArenaSnapshot, DEFAULT_ROUND_DELAY, DEFAULT_TASK_ID};
pub use buffer::{RateLimitFlag, StreamingBuffers};
pub use controller::{AgentRunController, AttemptPhase};
pub use scheduler::{
    ArenaEvent, BattleLoop, BattleShared, ControlSignal, LoopExit, SchedulerState,
};
pub use session::{
    AgentState, AgentStatus, BattleSession, BattleStatus, FinalStatus, IterationRecord, SessionId,
};
pub use store::{AttemptLease, MergeOutcome, SessionStore, SessionUpdate};
pub use summary::{AgentSummary, BattleSummary};
