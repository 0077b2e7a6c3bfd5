//! Four-state hidden Markov model for crosslink sites of RNA-binding proteins.
//! Coverage decides between the background and the enriched states,
//! and read-start counts decide between the crosslink and the non-crosslink states.
#[macro_use]
extern crate log;
pub mod config;
pub mod density;
pub mod error;
pub mod gen_obs;
pub mod hmm;
pub mod observation;
pub mod optimize;
pub mod report;

pub use config::FitConfig;
pub use density::{EmissionModel, LearnMode, PlainModel};
pub use error::{FitError, Result};
pub use hmm::{CrosslinkHmm, FitSummary, Paths, State};
pub use observation::{Interval, Observation, ObservationSet, Strand};
