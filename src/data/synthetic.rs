//! Seeded synthetic league generator
//!
//! Produces records in the ingestion format for a fabricated league with
//! latent team strengths that drift between seasons. Used for end-to-end
//! checks and for trying the pipeline without a real data feed.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::data::RawTeamGameRecord;
use crate::{GameId, HockeyError, Result, SeasonId, TeamId};

/// League shape and randomness
#[derive(Debug, Clone)]
pub struct SyntheticLeague {
    pub seasons: usize,
    pub teams: usize,
    /// Games per team per season
    pub games_per_team: usize,
    pub seed: u64,
    pub first_season: u16,
    /// Log-scale scoring boost for the home side
    pub home_edge: f64,
    /// Spread of latent team strengths
    pub strength_spread: f64,
}

impl SyntheticLeague {
    pub fn new(seasons: usize, teams: usize, games_per_team: usize, seed: u64) -> Self {
        SyntheticLeague {
            seasons,
            teams,
            games_per_team,
            seed,
            first_season: 2021,
            home_edge: 0.12,
            strength_spread: 0.45,
        }
    }

    pub fn team_ids(&self) -> Vec<TeamId> {
        (0..self.teams).map(|i| TeamId::new(format!("T{:02}", i + 1))).collect()
    }

    /// Generate every team-game record, two per game
    pub fn generate(&self) -> Result<Vec<RawTeamGameRecord>> {
        if self.teams < 2 || self.teams % 2 != 0 {
            return Err(HockeyError::Config(format!(
                "synthetic league needs an even number of teams (at least 2), got {}",
                self.teams
            )));
        }
        if self.seasons == 0 || self.games_per_team == 0 {
            return Err(HockeyError::Config(
                "synthetic league needs at least one season and one game per team".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let teams = self.team_ids();
        let mut strength: Vec<f64> = teams
            .iter()
            .map(|_| rng.gen_range(-1.0..1.0) * self.strength_spread)
            .collect();

        let mut records = Vec::with_capacity(self.seasons * self.teams * self.games_per_team);

        for s in 0..self.seasons {
            let start_year = self.first_season + s as u16;
            let season = SeasonId::from_start_year(start_year);
            let opening = NaiveDate::from_ymd_opt(start_year as i32, 10, 10).ok_or_else(|| {
                HockeyError::InvalidSeason(format!("no opening date for {}", season))
            })?;

            if s > 0 {
                for value in strength.iter_mut() {
                    *value = 0.8 * *value + normal(&mut rng) * 0.1;
                }
            }

            let mut day = 0i64;
            let mut order: Vec<usize> = (0..self.teams).collect();

            for round in 0..self.games_per_team {
                order.shuffle(&mut rng);
                let date = opening + Duration::days(day);

                for (slot, pair) in order.chunks(2).enumerate() {
                    let (home, away) = (pair[0], pair[1]);
                    let game_id = GameId(
                        start_year as i64 * 1_000_000
                            + 20_000
                            + (round * self.teams / 2 + slot) as i64
                            + 1,
                    );
                    let (h, a) = self.play(
                        &mut rng,
                        &teams[home],
                        &teams[away],
                        strength[home] - strength[away],
                        game_id,
                        season,
                        date,
                    );
                    records.push(h);
                    records.push(a);
                }

                day += rng.gen_range(1..=3);
            }
        }

        log::info!(
            "Generated synthetic league: {} seasons, {} teams, {} records",
            self.seasons,
            self.teams,
            records.len()
        );
        Ok(records)
    }

    #[allow(clippy::too_many_arguments)]
    fn play(
        &self,
        rng: &mut StdRng,
        home: &TeamId,
        away: &TeamId,
        edge: f64,
        game_id: GameId,
        season: SeasonId,
        date: NaiveDate,
    ) -> (RawTeamGameRecord, RawTeamGameRecord) {
        let rate_home = 3.0 * (0.5 * edge + self.home_edge).exp();
        let rate_away = 3.0 * (-0.5 * edge).exp();

        let mut home_goals = poisson(rng, rate_home);
        let mut away_goals = poisson(rng, rate_away);
        if home_goals == away_goals {
            // Overtime or shootout: one extra goal to the winner
            let p_home = 1.0 / (1.0 + (-(edge + self.home_edge)).exp());
            if rng.gen::<f64>() < p_home {
                home_goals += 1;
            } else {
                away_goals += 1;
            }
        }

        let xg_home = (rate_home + normal(rng) * 0.4).max(0.2);
        let xg_away = (rate_away + normal(rng) * 0.4).max(0.2);
        let shots_home = ((30.0 + 6.0 * edge + normal(rng) * 4.0).round() as u32).max(home_goals + 8);
        let shots_away = ((30.0 - 6.0 * edge + normal(rng) * 4.0).round() as u32).max(away_goals + 8);
        let corsi = (0.5 + 0.08 * edge + normal(rng) * 0.04).clamp(0.05, 0.95);
        let fenwick = (corsi + normal(rng) * 0.02).clamp(0.05, 0.95);
        let pp_home = (0.2 + 0.08 * edge + normal(rng) * 0.1).clamp(0.0, 1.0);
        let pp_away = (0.2 - 0.08 * edge + normal(rng) * 0.1).clamp(0.0, 1.0);
        let opps_home: u32 = rng.gen_range(1..=5);
        let opps_away: u32 = rng.gen_range(1..=5);

        let side = |team: &TeamId,
                    opponent: &TeamId,
                    is_home: bool,
                    gf: u32,
                    ga: u32,
                    (xgf, xga): (f64, f64),
                    (sf, sa): (u32, u32),
                    possession: f64,
                    fenwick: f64,
                    (pp, opp_pp): (f64, f64),
                    (opps, opp_opps): (u32, u32)| {
            let mut r = RawTeamGameRecord::new(team.clone(), game_id, season, date, is_home, gf, ga);
            r.opponent_id = Some(opponent.clone());
            r.shots_for = Some(sf);
            r.shots_against = Some(sa);
            r.x_goals_for = Some(xgf);
            r.x_goals_against = Some(xga);
            r.corsi_percentage = Some(possession);
            r.fenwick_percentage = Some(fenwick);
            r.high_danger_shots_for = Some((xgf * 3.0).round() as u32);
            r.penalties_for = Some(opp_opps);
            r.power_play_opportunities = Some(opps);
            r.penalty_kill_opportunities = Some(opp_opps);
            r.power_play_pct = Some(pp);
            r.penalty_kill_pct = Some(1.0 - opp_pp);
            r.save_pct = Some(1.0 - ga as f64 / sa as f64);
            r.goals_saved_above_expected = Some(xga - ga as f64);
            r
        };

        let home_record = side(
            home,
            away,
            true,
            home_goals,
            away_goals,
            (xg_home, xg_away),
            (shots_home, shots_away),
            corsi,
            fenwick,
            (pp_home, pp_away),
            (opps_home, opps_away),
        );
        let away_record = side(
            away,
            home,
            false,
            away_goals,
            home_goals,
            (xg_away, xg_home),
            (shots_away, shots_home),
            1.0 - corsi,
            1.0 - fenwick,
            (pp_away, pp_home),
            (opps_away, opps_home),
        );
        (home_record, away_record)
    }
}

/// Standard normal sample (Box-Muller)
fn normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Poisson sample by multiplication of uniforms
fn poisson(rng: &mut StdRng, rate: f64) -> u32 {
    let limit = (-rate).exp();
    let mut product: f64 = rng.gen();
    let mut count = 0;
    while product > limit && count < 30 {
        product *= rng.gen::<f64>();
        count += 1;
    }
    count
}
