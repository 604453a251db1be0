//! Raw per-team-game records at the ingestion boundary
//!
//! Records arrive as a JSON array using the camelCase field names of the
//! upstream feed. Required fields must be present; every other statistic
//! is optional and stays `None` rather than being coerced to a number.
//! Unknown field names are rejected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{GameId, HockeyError, Result, SeasonId, TeamId};

/// One team's performance in one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawTeamGameRecord {
    pub team_id: TeamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent_id: Option<TeamId>,
    pub game_id: GameId,
    pub season_id: SeasonId,
    pub game_date: NaiveDate,
    pub is_home: bool,
    pub goals_for: u32,
    pub goals_against: u32,
    #[serde(default)]
    pub shots_for: Option<u32>,
    #[serde(default)]
    pub shots_against: Option<u32>,
    #[serde(default)]
    pub x_goals_for: Option<f64>,
    #[serde(default)]
    pub x_goals_against: Option<f64>,
    #[serde(default)]
    pub corsi_percentage: Option<f64>,
    #[serde(default)]
    pub fenwick_percentage: Option<f64>,
    #[serde(default)]
    pub high_danger_shots_for: Option<u32>,
    #[serde(default)]
    pub penalties_for: Option<u32>,
    #[serde(default)]
    pub power_play_opportunities: Option<u32>,
    #[serde(default)]
    pub penalty_kill_opportunities: Option<u32>,
    #[serde(default)]
    pub power_play_pct: Option<f64>,
    #[serde(default)]
    pub penalty_kill_pct: Option<f64>,
    #[serde(default)]
    pub save_pct: Option<f64>,
    #[serde(default)]
    pub goals_saved_above_expected: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goalie_name: Option<String>,
}

impl RawTeamGameRecord {
    /// Minimal record with only the required fields set
    pub fn new(
        team_id: TeamId,
        game_id: GameId,
        season_id: SeasonId,
        game_date: NaiveDate,
        is_home: bool,
        goals_for: u32,
        goals_against: u32,
    ) -> Self {
        RawTeamGameRecord {
            team_id,
            opponent_id: None,
            game_id,
            season_id,
            game_date,
            is_home,
            goals_for,
            goals_against,
            shots_for: None,
            shots_against: None,
            x_goals_for: None,
            x_goals_against: None,
            corsi_percentage: None,
            fenwick_percentage: None,
            high_danger_shots_for: None,
            penalties_for: None,
            power_play_opportunities: None,
            penalty_kill_opportunities: None,
            power_play_pct: None,
            penalty_kill_pct: None,
            save_pct: None,
            goals_saved_above_expected: None,
            goalie_name: None,
        }
    }

    /// True if this team scored more goals (regulation, overtime and shootout alike)
    pub fn won(&self) -> bool {
        self.goals_for > self.goals_against
    }

    pub fn goal_diff(&self) -> f64 {
        self.goals_for as f64 - self.goals_against as f64
    }

    pub fn shot_margin(&self) -> Option<f64> {
        match (self.shots_for, self.shots_against) {
            (Some(f), Some(a)) => Some(f as f64 - a as f64),
            _ => None,
        }
    }

    pub fn x_goals_diff(&self) -> Option<f64> {
        match (self.x_goals_for, self.x_goals_against) {
            (Some(f), Some(a)) => Some(f - a),
            _ => None,
        }
    }

    /// Chronological sort key within a team or league
    pub fn sort_key(&self) -> (NaiveDate, GameId) {
        (self.game_date, self.game_id)
    }

    /// Reject values the feature code cannot interpret
    pub fn validate(&self, index: usize) -> Result<()> {
        let fractions = [
            ("corsiPercentage", self.corsi_percentage),
            ("fenwickPercentage", self.fenwick_percentage),
            ("powerPlayPct", self.power_play_pct),
            ("penaltyKillPct", self.penalty_kill_pct),
            ("savePct", self.save_pct),
        ];
        for (name, value) in fractions {
            if let Some(v) = value {
                if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                    return Err(HockeyError::InvalidRecord {
                        index,
                        message: format!(
                            "{} = {} for team {} game {} is not a fraction in [0, 1]",
                            name, v, self.team_id, self.game_id
                        ),
                    });
                }
            }
        }

        let reals = [
            ("xGoalsFor", self.x_goals_for),
            ("xGoalsAgainst", self.x_goals_against),
            ("goalsSavedAboveExpected", self.goals_saved_above_expected),
        ];
        for (name, value) in reals {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(HockeyError::InvalidRecord {
                        index,
                        message: format!(
                            "{} is not finite for team {} game {}",
                            name, self.team_id, self.game_id
                        ),
                    });
                }
            }
        }

        if self.team_id.as_str().is_empty() {
            return Err(HockeyError::InvalidRecord {
                index,
                message: format!("empty teamId in game {}", self.game_id),
            });
        }

        Ok(())
    }
}

/// Parse and validate records from a JSON array
pub fn parse_records(json: &str) -> Result<Vec<RawTeamGameRecord>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let mut records = Vec::with_capacity(values.len());

    for (index, value) in values.into_iter().enumerate() {
        let record: RawTeamGameRecord =
            serde_json::from_value(value).map_err(|e| HockeyError::InvalidRecord {
                index,
                message: e.to_string(),
            })?;
        record.validate(index)?;
        records.push(record);
    }

    Ok(records)
}

/// Load records from a JSON file
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<RawTeamGameRecord>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let records = parse_records(&content)?;
    log::info!("Loaded {} team-game records from {}", records.len(), path.display());
    Ok(records)
}

/// Write records as a JSON array
pub fn save_records<P: AsRef<Path>>(path: P, records: &[RawTeamGameRecord]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}
