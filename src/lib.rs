//! This crate provides tools for analyzing simulations of a CA1 microcircuit (pyramidal, basket and OLM cells) in
//! Rust: detection of depolarization blocks, characterization of bursts around them, spectral signatures of the
//! local field potential, and reduction of the results over parameter sweeps.
//!
//! # Detecting Depolarization Blocks
//!
//! ```rust
//! use ca1_analysis::config::AnalysisConfig;
//! use ca1_analysis::sweep::{process_block_trial, TrialOutcome};
//! use ca1_analysis::trial::{NeuronRecord, Trial};
//! use std::collections::BTreeMap;
//!
//! // Basket cells firing every 5 ms until 2000 ms
//! let mut records = BTreeMap::new();
//! for gid in 800..810 {
//!     let times = (0..400).map(|i| i as f64 * 5.0).collect();
//!     records.insert(gid, NeuronRecord::new(times));
//! }
//! let trial = Trial::new("00", records);
//!
//! let outcome = process_block_trial(&trial, &AnalysisConfig::default());
//! let detection = outcome.blocks().unwrap();
//! assert_eq!(detection.event_count(), 1);
//! assert_eq!(detection.intervals[0].end, 5000.0);
//! ```
//!
//! # Spectral Analysis
//!
//! ```rust
//! use ca1_analysis::spectral::{compute_psd, PsdParams, SpectralSummary};
//!
//! // Too short for the spectral analysis: 10 ms sampled every 0.1 ms
//! let summary = compute_psd(&vec![0.0; 100], &PsdParams::default());
//! assert_eq!(summary, SpectralSummary::degenerate());
//! ```
//!
//! # Sweeping Parameters
//!
//! ```rust
//! use ca1_analysis::config::AnalysisConfig;
//! use ca1_analysis::store::MemoryResultStore;
//! use ca1_analysis::sweep::{DirectoryTrialSource, ParameterGrid, Sweep, VariantAxis};
//!
//! let grid = ParameterGrid {
//!     gna: vec![0.8, 1.0, 1.2],
//!     gk: vec![0.8, 1.0, 1.2],
//!     axis: VariantAxis::Noise,
//!     values: vec![1.0],
//! };
//! let sweep = Sweep::new(AnalysisConfig::default(), grid, 15).unwrap();
//!
//! // Variants without trials are skipped
//! let source = DirectoryTrialSource::new("no/such/directory");
//! let summaries = sweep.run(&source, &MemoryResultStore::new()).unwrap();
//! assert!(summaries.is_empty());
//! ```

pub mod analysis;
pub mod block;
pub mod burst;
pub mod config;
pub mod convolution;
pub mod error;
pub mod population;
pub mod spectral;
pub mod spikes;
pub mod store;
pub mod sweep;
pub mod trial;
pub mod utils;

/// The simulation time step (ms), i.e., the sampling period of the voltage traces.
pub const DEFAULT_TIME_STEP: f64 = 0.1;
/// The simulated duration of a trial (ms).
pub const DEFAULT_TOTAL_DURATION: f64 = 5000.0;
/// The activity below which the convolved basket cell signal is considered blocked. Tunable, not calibrated.
pub const DEFAULT_BLOCK_THRESHOLD: f64 = 0.001;
