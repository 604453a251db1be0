//! Feature extraction and encoding
//!
//! Converts raw team-game records into leakage-free engineered records,
//! Elo ratings, and flattened matchup rows.

pub mod elo;
pub mod encoding;
pub mod engine;
pub mod matchup;
pub mod rolling;
pub mod team_stats;
pub mod temporal;

pub use elo::{EloEngine, EloGameEvent, EloSnapshot};
pub use encoding::TeamEncoder;
pub use engine::{EngineeredTeamGameRecord, FeatureEngine, FeatureSchema};
pub use matchup::{Game, MatchupAssembler};
pub use rolling::fill_early_season_default;
