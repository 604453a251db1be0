//! Matchup assembly
//!
//! Pairs the home and away team-game records of each game into a single
//! `Game` and flattens games into model rows: home-minus-away differentials,
//! non-differenced Elo and rest context, special-teams matchups, and one-hot
//! team identity for both roles.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::RawTeamGameRecord;
use crate::features::encoding::TeamEncoder;
use crate::features::engine::{EngineeredTeamGameRecord, FeatureSchema};
use crate::features::rolling::fill_early_season_default;
use crate::{GameId, HockeyError, Result, SeasonId, Side};

/// Anything carrying a raw team-game record
pub trait TeamGameRow {
    fn record(&self) -> &RawTeamGameRecord;
}

impl TeamGameRow for RawTeamGameRecord {
    fn record(&self) -> &RawTeamGameRecord {
        self
    }
}

impl TeamGameRow for EngineeredTeamGameRecord {
    fn record(&self) -> &RawTeamGameRecord {
        &self.raw
    }
}

/// Home and away rows sharing a game id
#[derive(Debug)]
pub struct GamePair<'a, T> {
    pub home: &'a T,
    pub away: &'a T,
}

#[derive(Debug)]
pub struct Pairing<'a, T> {
    /// Pairs ordered by (date, game id)
    pub pairs: Vec<GamePair<'a, T>>,
    /// Games dropped for a missing counterpart (lenient pairing only)
    pub dropped: Vec<GameId>,
}

/// Pair rows by game id
///
/// Two rows claiming the same role in one game is a `DuplicateRecord`; rows
/// that disagree on season, date or score are an `InconsistentPair`. A game
/// with only one side is a `MissingCounterpart` when `strict`, otherwise it
/// is dropped with a warning.
pub fn pair_by_game<T: TeamGameRow>(rows: &[T], strict: bool) -> Result<Pairing<'_, T>> {
    let mut slots: BTreeMap<GameId, (Option<&T>, Option<&T>)> = BTreeMap::new();

    for row in rows {
        let record = row.record();
        let slot = slots.entry(record.game_id).or_insert((None, None));
        let side = if record.is_home { &mut slot.0 } else { &mut slot.1 };
        if side.is_some() {
            return Err(HockeyError::DuplicateRecord {
                team: record.team_id.clone(),
                game: record.game_id,
                season: record.season_id,
            });
        }
        *side = Some(row);
    }

    let mut pairs = Vec::with_capacity(slots.len());
    let mut dropped = Vec::new();

    for (game_id, slot) in slots {
        match slot {
            (Some(home), Some(away)) => {
                check_consistent(home.record(), away.record())?;
                pairs.push(GamePair { home, away });
            }
            (Some(present), None) | (None, Some(present)) => {
                let record = present.record();
                let missing = if record.is_home { Side::Away } else { Side::Home };
                if strict {
                    return Err(HockeyError::MissingCounterpart {
                        game: game_id,
                        season: record.season_id,
                        side: missing,
                    });
                }
                log::warn!(
                    "Dropping game {} (season {}): no {} record",
                    game_id,
                    record.season_id,
                    missing
                );
                dropped.push(game_id);
            }
            (None, None) => {}
        }
    }

    pairs.sort_by_key(|p| p.home.record().sort_key());
    Ok(Pairing { pairs, dropped })
}

fn check_consistent(home: &RawTeamGameRecord, away: &RawTeamGameRecord) -> Result<()> {
    let game = home.game_id;
    let inconsistent =
        |detail: String| -> Result<()> { Err(HockeyError::InconsistentPair { game, detail }) };

    if home.team_id == away.team_id {
        return inconsistent(format!("team {} plays itself", home.team_id));
    }
    if home.season_id != away.season_id {
        return inconsistent(format!(
            "seasons differ ({} vs {})",
            home.season_id, away.season_id
        ));
    }
    if home.game_date != away.game_date {
        return inconsistent(format!(
            "dates differ ({} vs {})",
            home.game_date, away.game_date
        ));
    }
    if home.goals_for != away.goals_against || home.goals_against != away.goals_for {
        return inconsistent(format!(
            "scores differ ({}-{} vs {}-{})",
            home.goals_for, home.goals_against, away.goals_against, away.goals_for
        ));
    }
    for (record, other) in [(home, away), (away, home)] {
        if let Some(opponent) = &record.opponent_id {
            if *opponent != other.team_id {
                return inconsistent(format!(
                    "{} lists opponent {} but played {}",
                    record.team_id, opponent, other.team_id
                ));
            }
        }
    }
    Ok(())
}

/// A paired home/away game with its outcome
#[derive(Debug, Clone)]
pub struct Game {
    pub game_id: GameId,
    pub season: SeasonId,
    pub date: NaiveDate,
    pub home: EngineeredTeamGameRecord,
    pub away: EngineeredTeamGameRecord,
    /// Home goals > away goals, regardless of how the game was decided
    pub home_win: bool,
}

impl Game {
    pub fn from_pair(home: &EngineeredTeamGameRecord, away: &EngineeredTeamGameRecord) -> Self {
        Game {
            game_id: home.raw.game_id,
            season: home.raw.season_id,
            date: home.raw.game_date,
            home: home.clone(),
            away: away.clone(),
            home_win: home.raw.goals_for > home.raw.goals_against,
        }
    }

    pub fn home_goals(&self) -> u32 {
        self.home.raw.goals_for
    }

    pub fn away_goals(&self) -> u32 {
        self.away.raw.goals_for
    }

    pub fn target(&self) -> f64 {
        if self.home_win {
            1.0
        } else {
            0.0
        }
    }
}

const CONTEXT_COLUMNS: [&str; 8] = [
    "elo_home_pre",
    "elo_away_pre",
    "elo_diff_pre",
    "elo_expectation_home",
    "home_rest_days",
    "away_rest_days",
    "home_back_to_back",
    "away_back_to_back",
];

const SPECIAL_TEAMS_COLUMNS: [&str; 3] = ["pp_matchup_home", "pp_matchup_away", "special_teams_edge"];

/// Flattens games into model rows with a fixed column order
pub struct MatchupAssembler {
    schema: Arc<FeatureSchema>,
    teams: TeamEncoder,
    strict_pairing: bool,
    columns: Vec<String>,
}

impl MatchupAssembler {
    pub fn new(schema: Arc<FeatureSchema>, teams: TeamEncoder, strict_pairing: bool) -> Self {
        let mut columns: Vec<String> = schema
            .names()
            .iter()
            .map(|name| format!("{}_diff", name))
            .collect();
        columns.extend(CONTEXT_COLUMNS.iter().map(|c| c.to_string()));
        columns.extend(SPECIAL_TEAMS_COLUMNS.iter().map(|c| c.to_string()));
        columns.extend(teams.column_names("home"));
        columns.extend(teams.column_names("away"));

        MatchupAssembler {
            schema,
            teams,
            strict_pairing,
            columns,
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Pair engineered records into games ordered by (date, game id)
    pub fn assemble(&self, records: &[EngineeredTeamGameRecord]) -> Result<Vec<Game>> {
        let pairing = pair_by_game(records, self.strict_pairing)?;
        if !pairing.dropped.is_empty() {
            log::warn!(
                "Dropped {} unpaired games during assembly",
                pairing.dropped.len()
            );
        }

        let games: Vec<Game> = pairing
            .pairs
            .iter()
            .map(|p| Game::from_pair(p.home, p.away))
            .collect();
        log::info!("Assembled {} games from {} team-game records", games.len(), records.len());
        Ok(games)
    }

    /// One model row for a game, in `column_names` order
    pub fn row(&self, game: &Game) -> Vec<f64> {
        let home = &game.home;
        let away = &game.away;
        let mut row = Vec::with_capacity(self.columns.len());

        row.extend(
            home.features()
                .iter()
                .zip(away.features())
                .map(|(h, a)| h - a),
        );

        let feature = |record: &EngineeredTeamGameRecord, name: &str| {
            record.feature(name).unwrap_or(0.0)
        };
        row.extend([
            home.elo_pre,
            away.elo_pre,
            home.elo_pre - away.elo_pre,
            home.elo_expectation,
            feature(home, "rest_days"),
            feature(away, "rest_days"),
            feature(home, "back_to_back"),
            feature(away, "back_to_back"),
        ]);

        let special = special_teams(home, away);
        row.extend(special.iter().map(|v| fill_early_season_default(*v)));

        row.extend(self.teams.encode(&home.raw.team_id));
        row.extend(self.teams.encode(&away.raw.team_id));

        debug_assert_eq!(row.len(), self.columns.len());
        debug_assert_eq!(home.schema(), self.schema.as_ref());
        row
    }
}

/// Power play of one side against the other side's penalty kill
fn special_teams(
    home: &EngineeredTeamGameRecord,
    away: &EngineeredTeamGameRecord,
) -> [Option<f64>; 3] {
    let inputs = (
        home.defined_feature("season_pp_pct"),
        home.defined_feature("season_pk_pct"),
        away.defined_feature("season_pp_pct"),
        away.defined_feature("season_pk_pct"),
    );
    match inputs {
        (Some(home_pp), Some(home_pk), Some(away_pp), Some(away_pk)) => {
            let pp_home = (home_pp + (1.0 - away_pk)) / 2.0;
            let pp_away = (away_pp + (1.0 - home_pk)) / 2.0;
            [Some(pp_home), Some(pp_away), Some(pp_home - pp_away)]
        }
        _ => [None, None, None],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::engine::FeatureEngine;
    use crate::{FeatureConfig, TeamId};
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn make_record(team: &str, game: i64, day: i64, is_home: bool, gf: u32, ga: u32) -> RawTeamGameRecord {
        let start = NaiveDate::from_ymd_opt(2023, 10, 10).unwrap();
        let mut r = RawTeamGameRecord::new(
            TeamId::new(team),
            GameId(game),
            SeasonId::from_start_year(2023),
            start + Duration::days(day),
            is_home,
            gf,
            ga,
        );
        r.power_play_pct = Some(if is_home { 0.25 } else { 0.15 });
        r.penalty_kill_pct = Some(if is_home { 0.85 } else { 0.75 });
        r.shots_for = Some(30 + gf);
        r.shots_against = Some(28 + ga);
        r
    }

    /// Both sides of a game
    fn game(game: i64, day: i64, home: &str, away: &str, hg: u32, ag: u32) -> Vec<RawTeamGameRecord> {
        vec![
            make_record(home, game, day, true, hg, ag),
            make_record(away, game, day, false, ag, hg),
        ]
    }

    fn league() -> Vec<RawTeamGameRecord> {
        let mut records = Vec::new();
        records.extend(game(1, 0, "TOR", "MTL", 3, 2));
        records.extend(game(2, 1, "BOS", "TOR", 1, 4));
        records.extend(game(3, 3, "MTL", "BOS", 2, 3));
        records.extend(game(4, 5, "TOR", "BOS", 2, 3));
        records.extend(game(5, 6, "MTL", "TOR", 5, 1));
        records
    }

    fn engineered(records: &[RawTeamGameRecord]) -> (FeatureEngine, Vec<EngineeredTeamGameRecord>) {
        let engine = FeatureEngine::new(&FeatureConfig::default());
        let groups = engine.compute_all(records).unwrap();
        let out = engine.finalize(&groups, &BTreeMap::new(), 1500.0);
        (engine, out)
    }

    fn assembler(engine: &FeatureEngine, records: &[RawTeamGameRecord], strict: bool) -> MatchupAssembler {
        let teams = TeamEncoder::from_teams(records.iter().map(|r| &r.team_id));
        MatchupAssembler::new(Arc::clone(engine.schema()), teams, strict)
    }

    #[test]
    fn test_differentials_are_exact() {
        let records = league();
        let (engine, engineered) = engineered(&records);
        let assembler = assembler(&engine, &records, true);
        let games = assembler.assemble(&engineered).unwrap();
        assert_eq!(games.len(), 5);

        for g in &games {
            let row = assembler.row(g);
            assert_eq!(row.len(), assembler.column_names().len());
            for (k, name) in engine.schema().names().iter().enumerate() {
                let col = assembler
                    .column_names()
                    .iter()
                    .position(|c| *c == format!("{}_diff", name))
                    .unwrap();
                assert_eq!(row[col], g.home.features()[k] - g.away.features()[k]);
            }
        }
    }

    #[test]
    fn test_games_sorted_and_target() {
        let records = league();
        let (engine, engineered) = engineered(&records);
        let games = assembler(&engine, &records, true).assemble(&engineered).unwrap();
        let ids: Vec<i64> = games.iter().map(|g| g.game_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(games[0].home_win);
        assert!(!games[1].home_win);
        assert_eq!(games[3].target(), 0.0);
    }

    #[test]
    fn test_one_goal_overtime_win_counts() {
        let records = game(9, 0, "TOR", "MTL", 4, 3);
        let (engine, engineered) = engineered(&records);
        let games = assembler(&engine, &records, true).assemble(&engineered).unwrap();
        assert!(games[0].home_win);
        assert_eq!(games[0].home_goals(), 4);
        assert_eq!(games[0].away_goals(), 3);
    }

    #[test]
    fn test_team_one_hot_and_context() {
        let records = league();
        let (engine, engineered) = engineered(&records);
        let assembler = assembler(&engine, &records, true);
        let games = assembler.assemble(&engineered).unwrap();
        let row = assembler.row(&games[0]);
        let col = |name: &str| assembler.column_names().iter().position(|c| c == name).unwrap();

        assert_eq!(row[col("home_team_TOR")], 1.0);
        assert_eq!(row[col("home_team_MTL")], 0.0);
        assert_eq!(row[col("away_team_MTL")], 1.0);
        assert_eq!(row[col("elo_home_pre")], 1500.0);
        assert_eq!(row[col("elo_expectation_home")], 0.5);
        // First game for both sides: special teams undefined
        assert_eq!(row[col("pp_matchup_home")], 0.0);
    }

    #[test]
    fn test_special_teams_matchup() {
        let records = league();
        let (engine, engineered) = engineered(&records);
        let assembler = assembler(&engine, &records, true);
        let games = assembler.assemble(&engineered).unwrap();
        // Before game 4 both TOR and BOS have played once at home and once away
        let g = games.iter().find(|g| g.game_id == GameId(4)).unwrap();
        let row = assembler.row(g);
        let col = |name: &str| assembler.column_names().iter().position(|c| c == name).unwrap();

        let tor_pp = (0.25 + 0.15) / 2.0;
        let tor_pk = (0.85 + 0.75) / 2.0;
        let bos_pp = (0.25 + 0.15) / 2.0;
        let bos_pk = (0.85 + 0.75) / 2.0;
        let expected_home = (tor_pp + (1.0 - bos_pk)) / 2.0;
        let expected_away = (bos_pp + (1.0 - tor_pk)) / 2.0;
        assert_relative_eq!(row[col("pp_matchup_home")], expected_home);
        assert_relative_eq!(row[col("pp_matchup_away")], expected_away);
        assert_relative_eq!(row[col("special_teams_edge")], expected_home - expected_away);
    }

    #[test]
    fn test_missing_counterpart_is_fatal_when_strict() {
        let mut records = league();
        records.retain(|r| !(r.game_id == GameId(3) && !r.is_home));
        let (engine, engineered) = engineered(&records);
        let err = assembler(&engine, &records, true)
            .assemble(&engineered)
            .unwrap_err();
        match err {
            HockeyError::MissingCounterpart { game, side, .. } => {
                assert_eq!(game, GameId(3));
                assert_eq!(side, Side::Away);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_counterpart_dropped_when_lenient() {
        let mut records = league();
        records.retain(|r| !(r.game_id == GameId(3) && r.is_home));
        let (engine, engineered) = engineered(&records);
        let games = assembler(&engine, &records, false).assemble(&engineered).unwrap();
        assert_eq!(games.len(), 4);
        assert!(games.iter().all(|g| g.game_id != GameId(3)));
    }

    #[test]
    fn test_two_home_records_is_duplicate() {
        let mut records = game(1, 0, "TOR", "MTL", 3, 2);
        records.push(make_record("BOS", 1, 0, true, 1, 0));
        let err = pair_by_game(&records, true).unwrap_err();
        assert!(matches!(err, HockeyError::DuplicateRecord { game: GameId(1), .. }));
    }

    #[test]
    fn test_score_mismatch_is_inconsistent() {
        let mut records = game(1, 0, "TOR", "MTL", 3, 2);
        records[1].goals_for = 4;
        let err = pair_by_game(&records, true).unwrap_err();
        assert!(matches!(err, HockeyError::InconsistentPair { game: GameId(1), .. }));
    }
}
