//! Matchup dataset
//!
//! One row per game in (date, game id) order, with the feature matrix,
//! target vector and game metadata kept in lockstep. The fingerprint is a
//! SHA-256 over column names, matrix bits and targets, so two builds from
//! identical inputs can be compared directly.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::data::RawTeamGameRecord;
use crate::features::elo::{chronological_events, EloEngine};
use crate::features::{FeatureEngine, Game, MatchupAssembler, TeamEncoder};
use crate::{Config, GameId, HockeyError, Result, SeasonId, TeamId};

/// Traceability for one dataset row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub game_id: GameId,
    pub season: SeasonId,
    pub date: NaiveDate,
    pub home_team: TeamId,
    pub away_team: TeamId,
    pub home_goals: u32,
    pub away_goals: u32,
}

impl GameMetadata {
    pub fn from_game(game: &Game) -> Self {
        GameMetadata {
            game_id: game.game_id,
            season: game.season,
            date: game.date,
            home_team: game.home.raw.team_id.clone(),
            away_team: game.away.raw.team_id.clone(),
            home_goals: game.home_goals(),
            away_goals: game.away_goals(),
        }
    }
}

/// Feature matrix, target and metadata for a set of games
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// 1.0 for a home win
    pub target: Vec<f64>,
    pub games: Vec<GameMetadata>,
    pub fingerprint: String,
}

impl Dataset {
    pub fn from_parts(
        feature_names: Vec<String>,
        rows: Vec<Vec<f64>>,
        target: Vec<f64>,
        games: Vec<GameMetadata>,
    ) -> Result<Self> {
        if rows.len() != target.len() || rows.len() != games.len() {
            return Err(HockeyError::MisalignedDataset(format!(
                "row count mismatch: {} rows, {} targets, {} games",
                rows.len(),
                target.len(),
                games.len()
            )));
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != feature_names.len()) {
            return Err(HockeyError::MisalignedDataset(format!(
                "row {} has {} values for {} columns",
                bad,
                rows[bad].len(),
                feature_names.len()
            )));
        }

        let fingerprint = fingerprint(&feature_names, &rows, &target);
        Ok(Dataset {
            feature_names,
            rows,
            target,
            games,
            fingerprint,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Distinct seasons present, ascending
    pub fn seasons(&self) -> Vec<SeasonId> {
        let seasons: BTreeSet<SeasonId> = self.games.iter().map(|g| g.season).collect();
        seasons.into_iter().collect()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.feature_names.iter().position(|n| n == name)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }

    pub fn home_win_rate(&self) -> f64 {
        if self.target.is_empty() {
            0.0
        } else {
            self.target.iter().sum::<f64>() / self.target.len() as f64
        }
    }

    /// Rows belonging to the given seasons, same columns and order
    pub fn select_seasons(&self, seasons: &[SeasonId]) -> Dataset {
        let indices: Vec<usize> = self
            .games
            .iter()
            .enumerate()
            .filter(|(_, g)| seasons.contains(&g.season))
            .map(|(i, _)| i)
            .collect();
        self.select_rows(&indices)
    }

    fn select_rows(&self, indices: &[usize]) -> Dataset {
        let rows: Vec<Vec<f64>> = indices.iter().map(|&i| self.rows[i].clone()).collect();
        let target: Vec<f64> = indices.iter().map(|&i| self.target[i]).collect();
        let games: Vec<GameMetadata> = indices.iter().map(|&i| self.games[i].clone()).collect();
        let fingerprint = fingerprint(&self.feature_names, &rows, &target);
        Dataset {
            feature_names: self.feature_names.clone(),
            rows,
            target,
            games,
            fingerprint,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        log::info!("Saved dataset ({} rows) to {}", self.len(), path.display());
        Ok(())
    }

    /// Reads a saved dataset and checks its content against the stored fingerprint
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let dataset: Dataset = serde_json::from_reader(std::io::BufReader::new(file))?;
        let loaded = Dataset::from_parts(
            dataset.feature_names,
            dataset.rows,
            dataset.target,
            dataset.games,
        )?;
        if loaded.fingerprint != dataset.fingerprint {
            return Err(HockeyError::FingerprintMismatch {
                stored: dataset.fingerprint,
                computed: loaded.fingerprint,
            });
        }
        Ok(loaded)
    }
}

fn fingerprint(names: &[String], rows: &[Vec<f64>], target: &[f64]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    for row in rows {
        for v in row {
            hasher.update(v.to_bits().to_le_bytes());
        }
    }
    for t in target {
        hasher.update(t.to_bits().to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Runs features, Elo and matchup assembly over raw records
pub struct DatasetBuilder {
    config: Config,
}

impl DatasetBuilder {
    pub fn new(config: &Config) -> Self {
        DatasetBuilder {
            config: config.clone(),
        }
    }

    /// Build a dataset for the requested seasons (all seasons if empty)
    ///
    /// Every input record contributes history: earlier seasons seed Elo
    /// carryover and previous-season features even when not requested.
    pub fn build(&self, records: &[RawTeamGameRecord], seasons: &[SeasonId]) -> Result<Dataset> {
        if records.is_empty() {
            return Err(HockeyError::EmptyDataset("no input records".to_string()));
        }
        let strict = self.config.assembly.strict_pairing;

        let engine = FeatureEngine::new(&self.config.features);
        let groups = engine.compute_all(records)?;

        let events = chronological_events(records, strict)?;
        let mut elo = EloEngine::new(self.config.elo.clone());
        let snapshots = elo.process(&events)?;

        let engineered = engine.finalize(&groups, &snapshots, self.config.elo.base_rating);

        let teams = TeamEncoder::from_teams(records.iter().map(|r| &r.team_id));
        let assembler = MatchupAssembler::new(Arc::clone(engine.schema()), teams, strict);
        let games: Vec<Game> = assembler
            .assemble(&engineered)?
            .into_iter()
            .filter(|g| seasons.is_empty() || seasons.contains(&g.season))
            .collect();

        if games.is_empty() {
            return Err(HockeyError::EmptyDataset(format!(
                "no paired games in seasons {:?}",
                seasons.iter().map(|s| s.to_string()).collect::<Vec<_>>()
            )));
        }

        let rows = games.iter().map(|g| assembler.row(g)).collect();
        let target = games.iter().map(|g| g.target()).collect();
        let metadata = games.iter().map(GameMetadata::from_game).collect();

        let dataset = Dataset::from_parts(assembler.column_names().to_vec(), rows, target, metadata)?;
        log::info!(
            "Built dataset: {} games x {} columns (fingerprint {})",
            dataset.len(),
            dataset.n_features(),
            &dataset.fingerprint[..12]
        );
        Ok(dataset)
    }
}
