//! One-hot encoding of team identity

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::TeamId;

/// Dense team vocabulary, sorted by team id
///
/// Serializes as the vocabulary alone; the lookup index is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<TeamId>", into = "Vec<TeamId>")]
pub struct TeamEncoder {
    vocabulary: Vec<TeamId>,
    index: HashMap<TeamId, usize>,
}

impl PartialEq for TeamEncoder {
    fn eq(&self, other: &Self) -> bool {
        self.vocabulary == other.vocabulary
    }
}

impl Eq for TeamEncoder {}

impl From<Vec<TeamId>> for TeamEncoder {
    fn from(teams: Vec<TeamId>) -> Self {
        TeamEncoder::from_teams(&teams)
    }
}

impl From<TeamEncoder> for Vec<TeamId> {
    fn from(encoder: TeamEncoder) -> Self {
        encoder.vocabulary
    }
}

impl TeamEncoder {
    pub fn from_teams<'a>(teams: impl IntoIterator<Item = &'a TeamId>) -> Self {
        let unique: BTreeSet<&TeamId> = teams.into_iter().collect();
        let vocabulary: Vec<TeamId> = unique.into_iter().cloned().collect();
        let index = vocabulary
            .iter()
            .enumerate()
            .map(|(idx, team)| (team.clone(), idx))
            .collect();
        TeamEncoder { vocabulary, index }
    }

    pub fn vocabulary(&self) -> &[TeamId] {
        &self.vocabulary
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    pub fn index_of(&self, team: &TeamId) -> Option<usize> {
        self.index.get(team).copied()
    }

    /// Column names for one role, e.g. `home_team_TOR`
    pub fn column_names(&self, role: &str) -> Vec<String> {
        self.vocabulary
            .iter()
            .map(|team| format!("{}_team_{}", role, team))
            .collect()
    }

    /// One-hot vector; an unknown team encodes as all zeros
    pub fn encode(&self, team: &TeamId) -> Vec<f64> {
        let mut v = vec![0.0; self.vocabulary.len()];
        if let Some(idx) = self.index_of(team) {
            v[idx] = 1.0;
        }
        v
    }
}
