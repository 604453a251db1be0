//! Data ingestion and dataset assembly
//!
//! Raw record parsing at the ingestion boundary, a seeded synthetic league,
//! and the matchup dataset builder.

pub mod dataset;
pub mod records;
pub mod synthetic;

pub use dataset::{Dataset, DatasetBuilder, GameMetadata};
pub use records::{load_records, parse_records, save_records, RawTeamGameRecord};
pub use synthetic::SyntheticLeague;
