pub mod agent;
pub mod battle;
pub mod config;
pub mod util;
pub mod web;

pub use agent::{AgentError, AgentKind, GenerationEndpoint, HttpEndpoint, StreamEvent};
pub use battle::{
    Arena, ArenaEvent, ArenaOptions, ArenaSnapshot, BattleSession, BattleSummary,
    SchedulerState, SessionId,
};
pub use config::Config;
