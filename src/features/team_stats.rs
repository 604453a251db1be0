//! Per-game team statistics
//!
//! Each raw record is reduced to a fixed set of statistics from the team's
//! own perspective. The feature engine lags and aggregates these series.

use crate::data::RawTeamGameRecord;

/// A per-game statistic tracked by the feature engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stat {
    /// 1.0 for a win, 0.0 otherwise
    WinPct,
    GoalDiff,
    ShotMargin,
    XgDiff,
    GoalsFor,
    GoalsAgainst,
    CorsiPct,
    FenwickPct,
    HighDangerShots,
    PowerPlayPct,
    PenaltyKillPct,
    SavePct,
    /// Goals saved above expected
    Gsax,
}

impl Stat {
    /// Statistics with rolling-window features, in column order
    pub const ROLLING: [Stat; 13] = [
        Stat::WinPct,
        Stat::GoalDiff,
        Stat::ShotMargin,
        Stat::XgDiff,
        Stat::GoalsFor,
        Stat::GoalsAgainst,
        Stat::CorsiPct,
        Stat::FenwickPct,
        Stat::HighDangerShots,
        Stat::PowerPlayPct,
        Stat::PenaltyKillPct,
        Stat::SavePct,
        Stat::Gsax,
    ];

    /// Statistics with season-to-date features, in column order
    pub const SEASON: [Stat; 8] = [
        Stat::WinPct,
        Stat::GoalDiff,
        Stat::ShotMargin,
        Stat::XgDiff,
        Stat::PowerPlayPct,
        Stat::PenaltyKillPct,
        Stat::SavePct,
        Stat::Gsax,
    ];

    /// Statistics with momentum (rolling minus season-to-date) features
    pub const MOMENTUM: [Stat; 3] = [Stat::WinPct, Stat::GoalDiff, Stat::XgDiff];

    /// Statistics carried across the season boundary
    pub const CONTINUITY: [Stat; 3] = [Stat::WinPct, Stat::GoalDiff, Stat::XgDiff];

    pub fn name(&self) -> &'static str {
        match self {
            Stat::WinPct => "win_pct",
            Stat::GoalDiff => "goal_diff",
            Stat::ShotMargin => "shot_margin",
            Stat::XgDiff => "xg_diff",
            Stat::GoalsFor => "goals_for",
            Stat::GoalsAgainst => "goals_against",
            Stat::CorsiPct => "corsi_pct",
            Stat::FenwickPct => "fenwick_pct",
            Stat::HighDangerShots => "high_danger_shots",
            Stat::PowerPlayPct => "pp_pct",
            Stat::PenaltyKillPct => "pk_pct",
            Stat::SavePct => "save_pct",
            Stat::Gsax => "gsax",
        }
    }

    /// Value of this statistic in a single game, if recorded
    pub fn value(&self, record: &RawTeamGameRecord) -> Option<f64> {
        match self {
            Stat::WinPct => Some(if record.won() { 1.0 } else { 0.0 }),
            Stat::GoalDiff => Some(record.goal_diff()),
            Stat::ShotMargin => record.shot_margin(),
            Stat::XgDiff => record.x_goals_diff(),
            Stat::GoalsFor => Some(record.goals_for as f64),
            Stat::GoalsAgainst => Some(record.goals_against as f64),
            Stat::CorsiPct => record.corsi_percentage,
            Stat::FenwickPct => record.fenwick_percentage,
            Stat::HighDangerShots => record.high_danger_shots_for.map(|v| v as f64),
            Stat::PowerPlayPct => record.power_play_pct,
            Stat::PenaltyKillPct => record.penalty_kill_pct,
            Stat::SavePct => record.save_pct,
            Stat::Gsax => record.goals_saved_above_expected,
        }
    }
}

/// One statistic's per-game values for a team-season, in game order
#[derive(Debug, Clone)]
pub struct StatSeries {
    pub stat: Stat,
    pub values: Vec<Option<f64>>,
}

impl StatSeries {
    pub fn from_records(stat: Stat, records: &[RawTeamGameRecord]) -> Self {
        StatSeries {
            stat,
            values: records.iter().map(|r| stat.value(r)).collect(),
        }
    }
}

/// Final season-to-date values for a team, used as next season's continuity input
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeasonSummary {
    pub games_played: usize,
    pub win_pct: Option<f64>,
    pub goal_diff: Option<f64>,
    pub xg_diff: Option<f64>,
}

impl SeasonSummary {
    pub fn from_records(records: &[RawTeamGameRecord]) -> Self {
        let mean = |stat: Stat| {
            let values: Vec<Option<f64>> = records.iter().map(|r| stat.value(r)).collect();
            super::rolling::mean_present(&values)
        };
        SeasonSummary {
            games_played: records.len(),
            win_pct: mean(Stat::WinPct),
            goal_diff: mean(Stat::GoalDiff),
            xg_diff: mean(Stat::XgDiff),
        }
    }

    pub fn get(&self, stat: Stat) -> Option<f64> {
        match stat {
            Stat::WinPct => self.win_pct,
            Stat::GoalDiff => self.goal_diff,
            Stat::XgDiff => self.xg_diff,
            _ => None,
        }
    }
}
