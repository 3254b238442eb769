//! Cell populations of the microcircuit, identified by contiguous GID ranges.
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// A labelled half-open interval of GIDs `[start, end)`.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct PopulationRange {
    /// The population label, e.g., "Pyr".
    pub label: String,
    /// The first GID of the population.
    pub start: usize,
    /// One past the last GID of the population.
    pub end: usize,
}

impl PopulationRange {
    /// Create a new population range. Returns an error for an empty range.
    pub fn new(label: &str, start: usize, end: usize) -> Result<Self, AnalysisError> {
        if start >= end {
            return Err(AnalysisError::InvalidParameter(format!(
                "The GID range of population {} is empty: [{}, {})",
                label, start, end
            )));
        }
        Ok(PopulationRange {
            label: label.to_string(),
            start,
            end,
        })
    }

    /// Returns true if the GID belongs to the population.
    pub fn contains(&self, gid: usize) -> bool {
        gid >= self.start && gid < self.end
    }

    /// Returns the number of GIDs in the population.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns an iterator over the GIDs of the population.
    pub fn gids(&self) -> impl Iterator<Item = usize> {
        self.start..self.end
    }

    /// Returns the GID bounds as a range, empty if the bounds are inverted.
    pub fn bounds(&self) -> std::ops::Range<usize> {
        self.start..self.end.max(self.start)
    }

    /// Returns true if the two ranges share at least one GID.
    pub fn overlaps(&self, other: &PopulationRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The set of populations of a dataset. The ranges are pairwise disjoint.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Populations {
    ranges: Vec<PopulationRange>,
}

impl Populations {
    /// Create a new set of populations. Returns an error if a range is empty, or if two ranges overlap or share a
    /// label.
    pub fn new(ranges: Vec<PopulationRange>) -> Result<Self, AnalysisError> {
        for (i, range) in ranges.iter().enumerate() {
            if range.is_empty() {
                return Err(AnalysisError::InvalidParameter(format!(
                    "The GID range of population {} is empty: [{}, {})",
                    range.label, range.start, range.end
                )));
            }
            for other in ranges[i + 1..].iter() {
                if range.label == other.label {
                    return Err(AnalysisError::InvalidParameter(format!(
                        "Duplicate population label {}",
                        range.label
                    )));
                }
                if range.overlaps(other) {
                    return Err(AnalysisError::InvalidParameter(format!(
                        "Populations {} and {} overlap",
                        range.label, other.label
                    )));
                }
            }
        }
        Ok(Populations { ranges })
    }

    /// Returns the population with the given label.
    pub fn get(&self, label: &str) -> Result<&PopulationRange, AnalysisError> {
        self.ranges
            .iter()
            .find(|range| range.label == label)
            .ok_or_else(|| AnalysisError::UnknownPopulation(label.to_string()))
    }

    /// Returns the label of the population the GID belongs to, if any.
    pub fn label_of(&self, gid: usize) -> Option<&str> {
        self.ranges
            .iter()
            .find(|range| range.contains(gid))
            .map(|range| range.label.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PopulationRange> {
        self.ranges.iter()
    }

    pub fn num_populations(&self) -> usize {
        self.ranges.len()
    }
}

impl Default for Populations {
    /// The pyramidal, basket and OLM populations of the CA1 microcircuit.
    fn default() -> Self {
        Populations {
            ranges: vec![
                PopulationRange {
                    label: "Pyr".to_string(),
                    start: 0,
                    end: 800,
                },
                PopulationRange {
                    label: "Bwb".to_string(),
                    start: 800,
                    end: 1000,
                },
                PopulationRange {
                    label: "OLM".to_string(),
                    start: 1000,
                    end: 1200,
                },
            ],
        }
    }
}
