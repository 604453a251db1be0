//! Feature engine
//!
//! Turns raw per-team-game records into engineered records. Features for a
//! game are computed from strictly earlier games of the same team-season
//! (plus the team's previous-season summary), so each (team, season) group
//! is independent and the groups are processed in parallel.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::data::RawTeamGameRecord;
use crate::features::elo::EloSnapshot;
use crate::features::rolling::{
    fill_early_season_default, lagged_mean, lagged_season_mean, optional_diff,
};
use crate::features::team_stats::{SeasonSummary, Stat, StatSeries};
use crate::features::temporal::ScheduleTracker;
use crate::{FeatureConfig, GameId, HockeyError, Result, SeasonId, TeamId};

/// Ordered names of the per-team features
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
    rolling_windows: Vec<usize>,
    momentum_window: usize,
    trailing_day_windows: Vec<i64>,
    /// Index of the first previous-season column
    continuity_offset: usize,
}

impl FeatureSchema {
    pub fn new(config: &FeatureConfig) -> Self {
        let mut rolling_windows = config.rolling_windows.clone();
        rolling_windows.sort_unstable();
        rolling_windows.dedup();

        let mut names = vec!["season_games_played".to_string()];
        for stat in Stat::SEASON {
            names.push(format!("season_{}", stat.name()));
        }
        for stat in Stat::ROLLING {
            for w in &rolling_windows {
                names.push(format!("rolling_{}_{}", stat.name(), w));
            }
        }
        for stat in Stat::MOMENTUM {
            names.push(format!("momentum_{}", stat.name()));
        }
        names.push("rest_days".to_string());
        names.push("back_to_back".to_string());
        for days in &config.trailing_day_windows {
            names.push(format!("games_last_{}_days", days));
        }
        let continuity_offset = names.len();
        for stat in Stat::CONTINUITY {
            names.push(format!("prev_season_{}", stat.name()));
        }

        FeatureSchema {
            names,
            rolling_windows,
            momentum_window: config.momentum_window,
            trailing_day_windows: config.trailing_day_windows.clone(),
            continuity_offset,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Per-game features for one team-season, before continuity and Elo are attached
#[derive(Debug, Clone)]
pub struct TeamSeasonFeatures {
    pub team: TeamId,
    pub season: SeasonId,
    /// Records sorted by (date, game id)
    pub records: Vec<RawTeamGameRecord>,
    /// One row per record; `None` marks an undefined value
    pub rows: Vec<Vec<Option<f64>>>,
    pub summary: SeasonSummary,
}

/// A raw record plus its engineered features; immutable once built
#[derive(Debug, Clone)]
pub struct EngineeredTeamGameRecord {
    pub raw: RawTeamGameRecord,
    schema: Arc<FeatureSchema>,
    features: Vec<f64>,
    /// False where the fill value stands in for an undefined feature
    defined: Vec<bool>,
    /// This team's Elo rating before the game
    pub elo_pre: f64,
    /// This team's Elo win expectation for the game
    pub elo_expectation: f64,
}

impl EngineeredTeamGameRecord {
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Feature values in schema order
    pub fn features(&self) -> &[f64] {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).map(|i| self.features[i])
    }

    /// Feature value only if it was defined before the fill policy applied
    pub fn defined_feature(&self, name: &str) -> Option<f64> {
        self.schema
            .index_of(name)
            .filter(|i| self.defined[*i])
            .map(|i| self.features[i])
    }
}

/// Computes engineered features for every team-season
pub struct FeatureEngine {
    config: FeatureConfig,
    schema: Arc<FeatureSchema>,
}

impl FeatureEngine {
    pub fn new(config: &FeatureConfig) -> Self {
        FeatureEngine {
            config: config.clone(),
            schema: Arc::new(FeatureSchema::new(config)),
        }
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    /// Compute features for every (team, season) group in the input
    pub fn compute_all(&self, records: &[RawTeamGameRecord]) -> Result<Vec<TeamSeasonFeatures>> {
        let mut seen: HashSet<(&TeamId, GameId)> = HashSet::with_capacity(records.len());
        let mut groups: BTreeMap<(TeamId, SeasonId), Vec<RawTeamGameRecord>> = BTreeMap::new();

        for record in records {
            if !seen.insert((&record.team_id, record.game_id)) {
                return Err(HockeyError::DuplicateRecord {
                    team: record.team_id.clone(),
                    game: record.game_id,
                    season: record.season_id,
                });
            }
            groups
                .entry((record.team_id.clone(), record.season_id))
                .or_default()
                .push(record.clone());
        }

        let groups: Vec<Vec<RawTeamGameRecord>> = groups.into_values().collect();
        let computed = groups
            .par_iter()
            .map(|group| self.compute_team_season(group))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Computed {} features for {} team-seasons",
            self.schema.len(),
            computed.len()
        );
        Ok(computed)
    }

    /// Compute features for one team's games within one season
    pub fn compute_team_season(&self, records: &[RawTeamGameRecord]) -> Result<TeamSeasonFeatures> {
        let first = records.first().ok_or_else(|| {
            HockeyError::EmptyDataset("team-season group has no records".to_string())
        })?;
        let team = first.team_id.clone();
        let season = first.season_id;

        let mut records = records.to_vec();
        records.sort_by_key(|r| r.sort_key());

        for (index, record) in records.iter().enumerate() {
            if record.team_id != team || record.season_id != season {
                return Err(HockeyError::InvalidRecord {
                    index,
                    message: format!(
                        "team-season group {} {} contains a record for {} {}",
                        team, season, record.team_id, record.season_id
                    ),
                });
            }
        }
        for pair in records.windows(2) {
            if pair[0].game_id == pair[1].game_id {
                return Err(HockeyError::DuplicateRecord {
                    team: team.clone(),
                    game: pair[1].game_id,
                    season,
                });
            }
        }

        let series: HashMap<Stat, StatSeries> = Stat::ROLLING
            .iter()
            .map(|stat| (*stat, StatSeries::from_records(*stat, &records)))
            .collect();

        let mut tracker = ScheduleTracker::new(
            &self.schema.trailing_day_windows,
            self.config.back_to_back_days,
        );
        let mut rows = Vec::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            let mut row: Vec<Option<f64>> = Vec::with_capacity(self.schema.len());

            row.push(Some(i as f64));
            for stat in Stat::SEASON {
                row.push(lagged_season_mean(series_values(&series, stat), i));
            }
            for stat in Stat::ROLLING {
                for w in &self.schema.rolling_windows {
                    row.push(lagged_mean(series_values(&series, stat), i, *w));
                }
            }
            for stat in Stat::MOMENTUM {
                row.push(optional_diff(
                    lagged_mean(series_values(&series, stat), i, self.schema.momentum_window),
                    lagged_season_mean(series_values(&series, stat), i),
                ));
            }

            let schedule = tracker.compute(record.game_date);
            row.push(schedule.rest_days);
            row.push(Some(schedule.back_to_back));
            row.extend(schedule.games_in_window.iter().map(|g| Some(*g)));

            // Previous-season columns are attached in `finalize`
            row.extend(Stat::CONTINUITY.iter().map(|_| None));

            debug_assert_eq!(row.len(), self.schema.len());
            rows.push(row);
            tracker.update(record.game_date);
        }

        let summary = SeasonSummary::from_records(&records);
        Ok(TeamSeasonFeatures {
            team,
            season,
            records,
            rows,
            summary,
        })
    }

    /// Attach previous-season values and Elo, apply the fill policy, and build final records
    pub fn finalize(
        &self,
        groups: &[TeamSeasonFeatures],
        elo: &BTreeMap<GameId, EloSnapshot>,
        default_rating: f64,
    ) -> Vec<EngineeredTeamGameRecord> {
        let summaries: HashMap<(&TeamId, SeasonId), &SeasonSummary> = groups
            .iter()
            .map(|g| ((&g.team, g.season), &g.summary))
            .collect();

        let mut engineered = Vec::with_capacity(groups.iter().map(|g| g.records.len()).sum());

        for group in groups {
            let previous = group
                .season
                .previous()
                .and_then(|prev| summaries.get(&(&group.team, prev)).copied());

            for (record, row) in group.records.iter().zip(&group.rows) {
                let mut row = row.clone();
                for (k, stat) in Stat::CONTINUITY.iter().enumerate() {
                    row[self.schema.continuity_offset + k] = previous.and_then(|s| s.get(*stat));
                }
                let defined: Vec<bool> = row.iter().map(|v| v.is_some_and(f64::is_finite)).collect();
                let features: Vec<f64> =
                    row.iter().map(|v| fill_early_season_default(*v)).collect();

                let (elo_pre, elo_expectation) = match elo.get(&record.game_id) {
                    Some(snap) if record.is_home => (snap.elo_home_pre, snap.elo_expectation_home),
                    Some(snap) => (snap.elo_away_pre, 1.0 - snap.elo_expectation_home),
                    None => (default_rating, 0.5),
                };

                engineered.push(EngineeredTeamGameRecord {
                    raw: record.clone(),
                    schema: Arc::clone(&self.schema),
                    features,
                    defined,
                    elo_pre,
                    elo_expectation,
                });
            }
        }

        engineered
    }
}

fn series_values(series: &HashMap<Stat, StatSeries>, stat: Stat) -> &[Option<f64>] {
    series.get(&stat).map(|s| s.values.as_slice()).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn make_record(team: &str, game: i64, day: i64, gf: u32, ga: u32) -> RawTeamGameRecord {
        let start = NaiveDate::from_ymd_opt(2023, 10, 10).unwrap();
        RawTeamGameRecord::new(
            TeamId::new(team),
            GameId(game),
            SeasonId::from_start_year(2023),
            start + Duration::days(day),
            game % 2 == 0,
            gf,
            ga,
        )
    }

    fn engine() -> FeatureEngine {
        FeatureEngine::new(&FeatureConfig::default())
    }

    fn value(features: &TeamSeasonFeatures, index: usize, name: &str) -> Option<f64> {
        let engine = engine();
        let col = engine.schema().index_of(name).unwrap();
        features.rows[index][col]
    }

    /// Goal differentials +1, -2, +3, +4, -1 over five games
    fn five_game_season() -> Vec<RawTeamGameRecord> {
        vec![
            make_record("TOR", 1, 0, 3, 2),
            make_record("TOR", 2, 2, 1, 3),
            make_record("TOR", 3, 4, 5, 2),
            make_record("TOR", 4, 5, 4, 0),
            make_record("TOR", 5, 8, 2, 3),
        ]
    }

    #[test]
    fn test_rolling_goal_diff_fifth_game() {
        let e = engine();
        let f = e.compute_team_season(&five_game_season()).unwrap();
        // Games 2, 3, 4 have differentials -2, +3, +4
        assert_relative_eq!(value(&f, 4, "rolling_goal_diff_3").unwrap(), 5.0 / 3.0);
        assert_eq!(value(&f, 2, "rolling_goal_diff_3"), None);
        assert_relative_eq!(value(&f, 3, "rolling_goal_diff_3").unwrap(), 2.0 / 3.0);
        assert_eq!(value(&f, 4, "rolling_goal_diff_5"), None);
    }

    #[test]
    fn test_season_to_date() {
        let e = engine();
        let f = e.compute_team_season(&five_game_season()).unwrap();
        assert_eq!(value(&f, 0, "season_win_pct"), None);
        assert_relative_eq!(value(&f, 2, "season_win_pct").unwrap(), 0.5);
        assert_relative_eq!(value(&f, 4, "season_goal_diff").unwrap(), 1.5);
        assert_eq!(value(&f, 4, "season_games_played"), Some(4.0));
    }

    #[test]
    fn test_rest_and_back_to_back() {
        let e = engine();
        let f = e.compute_team_season(&five_game_season()).unwrap();
        assert_eq!(value(&f, 0, "rest_days"), None);
        assert_eq!(value(&f, 1, "rest_days"), Some(2.0));
        assert_eq!(value(&f, 3, "back_to_back"), Some(1.0));
        assert_eq!(value(&f, 2, "back_to_back"), Some(0.0));
        // Game on day 5 sees games on days 2 and 4 within 3 days
        assert_eq!(value(&f, 3, "games_last_3_days"), Some(2.0));
        assert_eq!(value(&f, 3, "games_last_6_days"), Some(3.0));
    }

    #[test]
    fn test_momentum_needs_window() {
        let mut records = five_game_season();
        records.push(make_record("TOR", 6, 10, 1, 0));
        let e = engine();
        let f = e.compute_team_season(&records).unwrap();
        assert_eq!(value(&f, 4, "momentum_goal_diff"), None);
        // Five prior games: rolling-5 equals season-to-date
        assert_relative_eq!(value(&f, 5, "momentum_goal_diff").unwrap(), 0.0);
    }

    #[test]
    fn test_no_future_information() {
        let e = engine();
        let full = e.compute_team_season(&five_game_season()).unwrap();

        for i in 0..5 {
            let mut altered = five_game_season();
            // Rewrite game i and everything after it
            for (j, r) in altered.iter_mut().enumerate().skip(i) {
                r.goals_for = 9 + j as u32;
                r.goals_against = 0;
                r.shots_for = Some(50);
                r.shots_against = Some(10);
            }
            let changed = e.compute_team_season(&altered).unwrap();
            for k in 0..=i {
                assert_eq!(full.rows[k], changed.rows[k], "game {} leaked into game {}", i, k);
            }
        }
    }

    #[test]
    fn test_first_game_filled_with_zero() {
        let e = engine();
        let groups = e.compute_all(&five_game_season()).unwrap();
        let records = e.finalize(&groups, &BTreeMap::new(), 1500.0);
        let first = &records[0];
        assert_eq!(first.raw.game_id, GameId(1));
        assert!(first.features().iter().all(|v| *v == 0.0));
        assert!(records.iter().all(|r| r.features().iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let e = engine();
        let mut records = five_game_season();
        records.extend(vec![
            make_record("MTL", 11, 1, 2, 2),
            make_record("MTL", 12, 3, 4, 1),
            make_record("MTL", 13, 6, 0, 1),
        ]);
        let forward = e.finalize(&e.compute_all(&records).unwrap(), &BTreeMap::new(), 1500.0);
        records.reverse();
        let backward = e.finalize(&e.compute_all(&records).unwrap(), &BTreeMap::new(), 1500.0);

        assert_eq!(forward.len(), backward.len());
        for (a, b) in forward.iter().zip(&backward) {
            assert_eq!(a.raw, b.raw);
            assert_eq!(a.features(), b.features());
        }
    }

    #[test]
    fn test_teams_do_not_affect_each_other() {
        let e = engine();
        let alone = e.compute_all(&five_game_season()).unwrap();
        let mut records = five_game_season();
        records.push(make_record("MTL", 21, 1, 7, 0));
        let together = e.compute_all(&records).unwrap();
        let tor = together.iter().find(|g| g.team == TeamId::new("TOR")).unwrap();
        assert_eq!(alone[0].rows, tor.rows);
    }

    #[test]
    fn test_duplicate_record_is_rejected() {
        let e = engine();
        let mut records = five_game_season();
        records.push(make_record("TOR", 3, 4, 1, 1));
        let err = e.compute_all(&records).unwrap_err();
        match err {
            HockeyError::DuplicateRecord { team, game, .. } => {
                assert_eq!(team, TeamId::new("TOR"));
                assert_eq!(game, GameId(3));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_previous_season_continuity() {
        let e = engine();
        let mut records = five_game_season();
        let mut next = make_record("TOR", 100, 365, 2, 1);
        next.season_id = SeasonId::from_start_year(2024);
        records.push(next);

        let groups = e.compute_all(&records).unwrap();
        let engineered = e.finalize(&groups, &BTreeMap::new(), 1500.0);
        let opener = engineered.iter().find(|r| r.raw.game_id == GameId(100)).unwrap();

        assert_relative_eq!(opener.feature("prev_season_win_pct").unwrap(), 0.6);
        assert_relative_eq!(opener.feature("prev_season_goal_diff").unwrap(), 1.0);
        assert_eq!(opener.feature("season_win_pct"), Some(0.0));
        assert_eq!(opener.defined_feature("season_win_pct"), None);
        assert!(opener.defined_feature("prev_season_win_pct").is_some());
        let first_season = engineered.iter().find(|r| r.raw.game_id == GameId(5)).unwrap();
        assert_eq!(first_season.feature("prev_season_win_pct"), Some(0.0));
    }

    #[test]
    fn test_schema_is_stable() {
        let a = FeatureSchema::new(&FeatureConfig::default());
        let b = FeatureSchema::new(&FeatureConfig::default());
        assert_eq!(a, b);
        assert!(a.index_of("rolling_goal_diff_3").is_some());
        assert!(a.index_of("rolling_save_pct_10").is_some());
        assert!(a.index_of("momentum_xg_diff").is_some());
        assert!(a.index_of("games_last_6_days").is_some());
    }
}
