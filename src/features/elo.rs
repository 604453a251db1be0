//! Elo rating system for team strength estimation
//!
//! Ratings move through `SeasonStart -> Active -> Ended` once per season.
//! Games are applied as a fold over a chronologically sorted event list,
//! league-wide; any event that breaks the ordering is rejected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::data::RawTeamGameRecord;
use crate::features::matchup::pair_by_game;
use crate::{EloConfig, GameId, HockeyError, Result, SeasonId, TeamId};

/// One completed game, as the rating engine sees it
#[derive(Debug, Clone, PartialEq)]
pub struct EloGameEvent {
    pub game_id: GameId,
    pub season: SeasonId,
    pub date: NaiveDate,
    pub home: TeamId,
    pub away: TeamId,
    pub home_goals: u32,
    pub away_goals: u32,
}

impl EloGameEvent {
    pub fn from_pair(home: &RawTeamGameRecord, away: &RawTeamGameRecord) -> Self {
        EloGameEvent {
            game_id: home.game_id,
            season: home.season_id,
            date: home.game_date,
            home: home.team_id.clone(),
            away: away.team_id.clone(),
            home_goals: home.goals_for,
            away_goals: home.goals_against,
        }
    }

    fn order_key(&self) -> (NaiveDate, GameId) {
        (self.date, self.game_id)
    }
}

/// Pair raw records into games and sort them into processing order
pub fn chronological_events(
    records: &[RawTeamGameRecord],
    strict_pairing: bool,
) -> Result<Vec<EloGameEvent>> {
    let pairing = pair_by_game(records, strict_pairing)?;
    let mut events: Vec<EloGameEvent> = pairing
        .pairs
        .iter()
        .map(|p| EloGameEvent::from_pair(p.home, p.away))
        .collect();
    events.sort_by_key(|e| (e.season, e.date, e.game_id));
    Ok(events)
}

/// Pre-game ratings exposed for one game
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EloSnapshot {
    pub game_id: GameId,
    pub elo_home_pre: f64,
    pub elo_away_pre: f64,
    pub elo_diff_pre: f64,
    pub elo_expectation_home: f64,
}

/// A single rating change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingUpdate {
    pub game_id: GameId,
    pub date: NaiveDate,
    pub pre: f64,
    pub post: f64,
}

/// A team's rating within one season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub initial: f64,
    pub rating: f64,
    pub history: Vec<RatingUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonPhase {
    SeasonStart,
    Active,
    Ended,
}

/// Ratings state for one season in progress
#[derive(Debug, Clone)]
pub struct SeasonRatings {
    pub season: SeasonId,
    pub phase: SeasonPhase,
    teams: BTreeMap<TeamId, TeamRating>,
    last_event: Option<(NaiveDate, GameId)>,
    last_team_game: HashMap<TeamId, (NaiveDate, GameId)>,
}

impl SeasonRatings {
    pub fn rating(&self, team: &TeamId) -> Option<f64> {
        self.teams.get(team).map(|t| t.rating)
    }
}

/// Elo rating engine with season-boundary carryover
pub struct EloEngine {
    config: EloConfig,
    /// Ratings of every finished season
    archive: BTreeMap<SeasonId, BTreeMap<TeamId, TeamRating>>,
}

impl Default for EloEngine {
    fn default() -> Self {
        Self::new(EloConfig::default())
    }
}

impl EloEngine {
    pub fn new(config: EloConfig) -> Self {
        EloEngine {
            config,
            archive: BTreeMap::new(),
        }
    }

    /// Expected score (0-1) for the home team
    pub fn expected_home(&self, home_rating: f64, away_rating: f64) -> f64 {
        let diff = home_rating + self.config.home_advantage - away_rating;
        1.0 / (1.0 + 10f64.powf(-diff / self.config.scale))
    }

    /// Sub-linear weight on the goal margin; 1.0 for a one-goal game
    pub fn margin_multiplier(goal_diff: i64) -> f64 {
        ((goal_diff.unsigned_abs() as f64) + 1.0).ln() / std::f64::consts::LN_2
    }

    /// Season-start rating for a team that finished the prior season at `final_rating`
    pub fn carryover(&self, final_rating: f64) -> f64 {
        self.config.base_rating + self.config.carryover * (final_rating - self.config.base_rating)
    }

    /// Rating a team starts the season with
    pub fn initial_rating(&self, team: &TeamId, season: SeasonId) -> f64 {
        season
            .previous()
            .and_then(|prev| self.final_rating(team, prev))
            .map(|r| self.carryover(r))
            .unwrap_or(self.config.base_rating)
    }

    /// Final rating of a team in a finished season
    pub fn final_rating(&self, team: &TeamId, season: SeasonId) -> Option<f64> {
        self.archive
            .get(&season)
            .and_then(|teams| teams.get(team))
            .map(|t| t.rating)
    }

    /// Rating history of a team in a finished season
    pub fn history(&self, team: &TeamId, season: SeasonId) -> Option<&[RatingUpdate]> {
        self.archive
            .get(&season)
            .and_then(|teams| teams.get(team))
            .map(|t| t.history.as_slice())
    }

    pub fn start_season(&self, season: SeasonId) -> SeasonRatings {
        SeasonRatings {
            season,
            phase: SeasonPhase::SeasonStart,
            teams: BTreeMap::new(),
            last_event: None,
            last_team_game: HashMap::new(),
        }
    }

    /// Apply one game: read both pre-game ratings, then update them
    pub fn apply(
        &self,
        mut state: SeasonRatings,
        event: &EloGameEvent,
    ) -> Result<(SeasonRatings, EloSnapshot)> {
        if state.phase == SeasonPhase::Ended {
            return Err(self.unordered(event, &event.home, "season already ended"));
        }
        if event.season != state.season {
            return Err(self.unordered(
                event,
                &event.home,
                &format!("event belongs to season {} while processing {}", event.season, state.season),
            ));
        }
        let key = event.order_key();
        if let Some(last) = state.last_event {
            if key < last {
                return Err(self.unordered(
                    event,
                    &event.home,
                    &format!("league order regressed from game {} on {}", last.1, last.0),
                ));
            }
        }
        for team in [&event.home, &event.away] {
            if let Some(previous) = state.last_team_game.get(team) {
                if event.date <= previous.0 {
                    return Err(self.unordered(
                        event,
                        team,
                        &format!("not after the team's game {} on {}", previous.1, previous.0),
                    ));
                }
            }
        }

        let home_pre = self.rating_in(&mut state, &event.home);
        let away_pre = self.rating_in(&mut state, &event.away);
        let expected = self.expected_home(home_pre, away_pre);

        let actual = if event.home_goals > event.away_goals {
            1.0
        } else {
            0.0
        };
        let goal_diff = event.home_goals as i64 - event.away_goals as i64;
        let delta = self.config.k_factor * Self::margin_multiplier(goal_diff) * (actual - expected);

        for (team, pre, post) in [
            (&event.home, home_pre, home_pre + delta),
            (&event.away, away_pre, away_pre - delta),
        ] {
            if let Some(entry) = state.teams.get_mut(team) {
                entry.rating = post;
                entry.history.push(RatingUpdate {
                    game_id: event.game_id,
                    date: event.date,
                    pre,
                    post,
                });
            }
            state.last_team_game.insert(team.clone(), key);
        }
        state.last_event = Some(key);
        state.phase = SeasonPhase::Active;

        let snapshot = EloSnapshot {
            game_id: event.game_id,
            elo_home_pre: home_pre,
            elo_away_pre: away_pre,
            elo_diff_pre: home_pre - away_pre,
            elo_expectation_home: expected,
        };
        Ok((state, snapshot))
    }

    /// Archive a season's final ratings for the next season's carryover
    pub fn end_season(&mut self, mut state: SeasonRatings) {
        state.phase = SeasonPhase::Ended;
        log::debug!(
            "Season {} ended with {} rated teams",
            state.season,
            state.teams.len()
        );
        self.archive.insert(state.season, state.teams);
    }

    /// Run every season in the event list; events must be sorted by (season, date, game)
    pub fn process(&mut self, events: &[EloGameEvent]) -> Result<BTreeMap<GameId, EloSnapshot>> {
        let mut snapshots = BTreeMap::new();
        let mut start = 0;

        while start < events.len() {
            let season = events[start].season;
            let end = events[start..]
                .iter()
                .position(|e| e.season != season)
                .map_or(events.len(), |offset| start + offset);

            if self.archive.range(season..).next().is_some() {
                return Err(self.unordered(
                    &events[start],
                    &events[start].home,
                    &format!("season {} arrives after a later or equal season", season),
                ));
            }

            let state = self.start_season(season);
            let (state, season_snapshots) = events[start..end].iter().try_fold(
                (state, Vec::with_capacity(end - start)),
                |(state, mut acc), event| {
                    let (state, snapshot) = self.apply(state, event)?;
                    acc.push(snapshot);
                    Ok::<_, HockeyError>((state, acc))
                },
            )?;
            self.end_season(state);

            for snapshot in season_snapshots {
                snapshots.insert(snapshot.game_id, snapshot);
            }
            start = end;
        }

        log::info!(
            "Processed Elo for {} games across {} seasons",
            snapshots.len(),
            self.archive.len()
        );
        Ok(snapshots)
    }

    fn rating_in(&self, state: &mut SeasonRatings, team: &TeamId) -> f64 {
        let initial = self.initial_rating(team, state.season);
        state
            .teams
            .entry(team.clone())
            .or_insert_with(|| TeamRating {
                initial,
                rating: initial,
                history: Vec::new(),
            })
            .rating
    }

    fn unordered(&self, event: &EloGameEvent, team: &TeamId, detail: &str) -> HockeyError {
        HockeyError::UnorderedGames {
            team: team.clone(),
            game: event.game_id,
            season: event.season,
            detail: detail.to_string(),
        }
    }
}
