//! Hockey game prediction
//!
//! Temporal-safe feature engineering, Elo ratings, and chronologically
//! validated model training for predicting hockey game winners.

pub mod data;
pub mod features;
pub mod pipeline;
pub mod training;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stable team identifier (e.g. "TOR")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub String);

impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        TeamId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// League-wide game identifier, shared by the home and away rows of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub i64);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A season, written as 8 digits: "20232024" is the 2023-24 season
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeasonId {
    start_year: u16,
}

impl SeasonId {
    pub fn from_start_year(start_year: u16) -> Self {
        SeasonId { start_year }
    }

    pub fn start_year(&self) -> u16 {
        self.start_year
    }

    /// The season immediately before this one
    pub fn previous(&self) -> Option<SeasonId> {
        self.start_year.checked_sub(1).map(SeasonId::from_start_year)
    }

    /// Number of seasons between `self` and a later season
    pub fn seasons_until(&self, later: SeasonId) -> i32 {
        later.start_year as i32 - self.start_year as i32
    }
}

impl fmt::Display for SeasonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.start_year, self.start_year as u32 + 1)
    }
}

impl FromStr for SeasonId {
    type Err = HockeyError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(HockeyError::InvalidSeason(format!(
                "{:?} is not an 8-digit season id",
                s
            )));
        }
        let start: u16 = s[..4]
            .parse()
            .map_err(|_| HockeyError::InvalidSeason(s.to_string()))?;
        let end: u32 = s[4..]
            .parse()
            .map_err(|_| HockeyError::InvalidSeason(s.to_string()))?;
        if end != start as u32 + 1 {
            return Err(HockeyError::InvalidSeason(format!(
                "{} does not span consecutive years",
                s
            )));
        }
        Ok(SeasonId::from_start_year(start))
    }
}

impl TryFrom<String> for SeasonId {
    type Error = HockeyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SeasonId> for String {
    fn from(season: SeasonId) -> Self {
        season.to_string()
    }
}

/// Home or away role within a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Home,
    Away,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => write!(f, "home"),
            Side::Away => write!(f, "away"),
        }
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum HockeyError {
    #[error("Duplicate record for team {team} in game {game} (season {season})")]
    DuplicateRecord {
        team: TeamId,
        game: GameId,
        season: SeasonId,
    },

    #[error("Game {game} (season {season}) has no {side} record")]
    MissingCounterpart {
        game: GameId,
        season: SeasonId,
        side: Side,
    },

    #[error("Game {game} has inconsistent home/away records: {detail}")]
    InconsistentPair { game: GameId, detail: String },

    #[error("Games out of chronological order for team {team} at game {game} (season {season}): {detail}")]
    UnorderedGames {
        team: TeamId,
        game: GameId,
        season: SeasonId,
        detail: String,
    },

    #[error("Invalid record #{index}: {message}")]
    InvalidRecord { index: usize, message: String },

    #[error("Invalid season: {0}")]
    InvalidSeason(String),

    #[error("Invalid season split: {0}")]
    InvalidSplit(String),

    #[error("Every model candidate failed to fit")]
    NoViableCandidate,

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Misaligned dataset: {0}")]
    MisalignedDataset(String),

    #[error("Dataset fingerprint mismatch: stored {stored}, content hashes to {computed}")]
    FingerprintMismatch { stored: String, computed: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HockeyError {
    /// True for errors that mean the input data is corrupt
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            HockeyError::DuplicateRecord { .. }
                | HockeyError::MissingCounterpart { .. }
                | HockeyError::InconsistentPair { .. }
                | HockeyError::UnorderedGames { .. }
                | HockeyError::InvalidRecord { .. }
                | HockeyError::MisalignedDataset(_)
                | HockeyError::FingerprintMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HockeyError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub features: FeatureConfig,
    pub elo: EloConfig,
    pub assembly: AssemblyConfig,
    pub training: TrainingConfig,
    pub calibration: CalibrationConfig,
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub rolling_windows: Vec<usize>,
    /// Rolling window compared against season-to-date for momentum
    pub momentum_window: usize,
    /// Calendar-day windows for trailing game counts
    pub trailing_day_windows: Vec<i64>,
    /// Rest at or below this many days is a back-to-back
    pub back_to_back_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EloConfig {
    pub base_rating: f64,
    pub k_factor: f64,
    pub home_advantage: f64,
    /// 0 = full reset to base each season, 1 = full carryover
    pub carryover: f64,
    /// Rating difference that corresponds to 10:1 odds
    pub scale: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Treat games missing a home or away record as fatal
    pub strict_pairing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// L2 penalty candidates for the logistic model
    pub regularization_candidates: Vec<f64>,
    /// Per-season sample weight decay candidates (1.0 = no decay)
    pub weight_decay_candidates: Vec<f64>,
    pub learning_rate: f64,
    pub max_epochs: usize,
    pub tolerance: f64,
    pub patience: usize,
    pub boosting_rounds: Vec<usize>,
    pub boosting_depths: Vec<usize>,
    pub boosting_learning_rate: f64,
    pub boosting_min_child_weight: f64,
    pub boosting_l2: f64,
    pub boosting_bins: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Fewer validation rows than this skips calibration
    pub min_samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Bucket edges on |p - 0.5|
    pub confidence_edges: Vec<f64>,
    pub threshold_grid_step: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            features: FeatureConfig::default(),
            elo: EloConfig::default(),
            assembly: AssemblyConfig::default(),
            training: TrainingConfig::default(),
            calibration: CalibrationConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            rolling_windows: vec![3, 5, 10],
            momentum_window: 5,
            trailing_day_windows: vec![3, 6],
            back_to_back_days: 1,
        }
    }
}

impl Default for EloConfig {
    fn default() -> Self {
        EloConfig {
            base_rating: 1500.0,
            k_factor: 10.0,
            home_advantage: 35.0,
            carryover: 0.7,
            scale: 400.0,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        AssemblyConfig {
            strict_pairing: true,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            regularization_candidates: vec![0.001, 0.01, 0.1],
            weight_decay_candidates: vec![1.0, 0.8],
            learning_rate: 0.05,
            max_epochs: 2000,
            tolerance: 1e-6,
            patience: 25,
            boosting_rounds: vec![60],
            boosting_depths: vec![2, 3],
            boosting_learning_rate: 0.1,
            boosting_min_child_weight: 1.0,
            boosting_l2: 1.0,
            boosting_bins: 32,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig { min_samples: 50 }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            confidence_edges: vec![0.0, 0.05, 0.10, 0.15, 0.20, 0.50],
            threshold_grid_step: 0.01,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HockeyError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| HockeyError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HockeyError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let f = &self.features;
        if f.rolling_windows.is_empty() || f.rolling_windows.contains(&0) {
            return Err(HockeyError::Config(
                "rolling_windows must be non-empty and positive".to_string(),
            ));
        }
        if !f.rolling_windows.contains(&f.momentum_window) {
            return Err(HockeyError::Config(format!(
                "momentum_window {} is not one of rolling_windows {:?}",
                f.momentum_window, f.rolling_windows
            )));
        }
        if !(0.0..=1.0).contains(&self.elo.carryover) {
            return Err(HockeyError::Config(format!(
                "elo.carryover must be in [0, 1], got {}",
                self.elo.carryover
            )));
        }
        if self.elo.scale <= 0.0 {
            return Err(HockeyError::Config("elo.scale must be positive".to_string()));
        }
        let t = &self.training;
        if t
            .weight_decay_candidates
            .iter()
            .any(|d| !(*d > 0.0 && *d <= 1.0))
        {
            return Err(HockeyError::Config(
                "weight_decay_candidates must be in (0, 1]".to_string(),
            ));
        }
        if t.regularization_candidates.iter().any(|l2| *l2 < 0.0) {
            return Err(HockeyError::Config(
                "regularization_candidates must be non-negative".to_string(),
            ));
        }
        let edges = &self.evaluation.confidence_edges;
        if edges.len() < 2 || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HockeyError::Config(
                "confidence_edges must be strictly increasing with at least two edges".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_season_parse_and_display() {
        let season: SeasonId = "20232024".parse().unwrap();
        assert_eq!(season.start_year(), 2023);
        assert_eq!(season.to_string(), "20232024");
        assert_eq!(season.previous().unwrap().to_string(), "20222023");
    }

    #[test]
    fn test_season_rejects_malformed() {
        assert!("2023".parse::<SeasonId>().is_err());
        assert!("20232025".parse::<SeasonId>().is_err());
        assert!("2023-024".parse::<SeasonId>().is_err());
    }

    #[test]
    fn test_season_serde_as_string() {
        let season = SeasonId::from_start_year(2021);
        let json = serde_json::to_string(&season).unwrap();
        assert_eq!(json, "\"20212022\"");
        let back: SeasonId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, season);
    }

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_config_rejects_missing_momentum_window() {
        let mut config = Config::default();
        config.features.momentum_window = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_toml_partial_uses_defaults() {
        let config: Config = toml::from_str("[elo]\nk_factor = 20.0\n").unwrap();
        assert_eq!(config.elo.k_factor, 20.0);
        assert_eq!(config.elo.base_rating, 1500.0);
        assert_eq!(config.features.rolling_windows, vec![3, 5, 10]);
    }

    #[test]
    fn test_integrity_classification() {
        let err = HockeyError::MissingCounterpart {
            game: GameId(1),
            season: SeasonId::from_start_year(2023),
            side: Side::Away,
        };
        assert!(err.is_data_integrity());
        assert!(err.to_string().contains("20232024"));
        assert!(!HockeyError::NoViableCandidate.is_data_integrity());
    }
}
