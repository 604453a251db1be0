//! Rest and schedule features
//!
//! Tracks a single team's game dates through a season. `compute` is
//! always called before `update` for the same game, so the current game
//! never counts toward its own rest or density values.

use chrono::NaiveDate;

/// Rest/schedule context for one team-game
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScheduleFeatures {
    /// Days since the team's previous game, `None` for its first game
    pub rest_days: Option<f64>,
    /// 1.0 if rest is at or below the back-to-back threshold
    pub back_to_back: f64,
    /// Prior games within each trailing calendar-day window, same order as configured
    pub games_in_window: Vec<f64>,
}

/// Computes schedule features for one team-season
pub struct ScheduleTracker {
    /// Trailing windows in calendar days
    windows: Vec<i64>,
    back_to_back_days: i64,
    last_game: Option<NaiveDate>,
    recent_games: Vec<NaiveDate>,
}

impl ScheduleTracker {
    pub fn new(windows: &[i64], back_to_back_days: i64) -> Self {
        ScheduleTracker {
            windows: windows.to_vec(),
            back_to_back_days,
            last_game: None,
            recent_games: Vec::new(),
        }
    }

    /// Compute schedule context for a game (call BEFORE update)
    pub fn compute(&self, date: NaiveDate) -> ScheduleFeatures {
        let rest = self.last_game.map(|last| (date - last).num_days());

        let back_to_back = match rest {
            Some(days) if days <= self.back_to_back_days => 1.0,
            _ => 0.0,
        };

        let games_in_window = self
            .windows
            .iter()
            .map(|window| self.games_in_window(date, *window) as f64)
            .collect();

        ScheduleFeatures {
            rest_days: rest.map(|d| d as f64),
            back_to_back,
            games_in_window,
        }
    }

    /// Record a played game
    pub fn update(&mut self, date: NaiveDate) {
        self.last_game = Some(date);
        self.recent_games.push(date);

        let horizon = self.windows.iter().copied().max().unwrap_or(0);
        self.recent_games
            .retain(|d| (date - *d).num_days() <= horizon);
    }

    /// Prior games 1..=days before the given date
    fn games_in_window(&self, date: NaiveDate, days: i64) -> usize {
        self.recent_games
            .iter()
            .filter(|d| {
                let diff = (date - **d).num_days();
                diff > 0 && diff <= days
            })
            .count()
    }
}
