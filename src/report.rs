//! Per-position calls and crosslink regions handed to the output writers.
//! Positions are strand-relative: the interval start plus the offset in the interval.
use crate::density::StateProbs;
use crate::hmm::{CrosslinkHmm, Paths, State};
use crate::observation::Strand;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionCall {
    pub strand: Strand,
    pub interval: usize,
    pub position: usize,
    pub state: u8,
    pub posteriors: StateProbs,
    /// log(posterior of the called state / the second largest posterior)
    pub score: f64,
    /// log((p2 + p3) / (p0 + p1))
    pub enrichment: f64,
}

/// Log ratio of the posterior of `state` to the largest posterior among the other states.
/// A vanishing denominator is replaced by the smallest positive `f64`.
pub fn log_posterior_ratio(posteriors: &StateProbs, state: usize) -> f64 {
    let second = posteriors
        .iter()
        .enumerate()
        .filter(|&(k, _)| k != state)
        .map(|(_, &p)| p)
        .fold(0f64, f64::max);
    (posteriors[state] / second.max(f64::MIN_POSITIVE)).ln()
}

pub fn log_enrichment_ratio(posteriors: &StateProbs) -> f64 {
    let enriched = posteriors[2] + posteriors[3];
    let background = posteriors[0] + posteriors[1];
    (enriched / background.max(f64::MIN_POSITIVE)).ln()
}

/// Calls at every position along `paths`.
pub fn position_calls(hmm: &CrosslinkHmm, paths: &Paths) -> Vec<PositionCall> {
    let mut calls = vec![];
    for strand in Strand::BOTH.iter().copied() {
        let intervals = hmm.observations().strand(strand);
        let posteriors = hmm.posteriors(strand);
        let paths = &paths[strand.index()];
        for (i, ((interval, posts), path)) in intervals.iter().zip(posteriors).zip(paths).enumerate() {
            for (t, (post, &state)) in posts.iter().zip(path.iter()).enumerate() {
                calls.push(PositionCall {
                    strand,
                    interval: i,
                    position: interval.start + t,
                    state,
                    posteriors: *post,
                    score: log_posterior_ratio(post, state as usize),
                    enrichment: log_enrichment_ratio(post),
                });
            }
        }
    }
    calls
}

/// Positions called as crosslink sites.
pub fn crosslink_sites(calls: &[PositionCall]) -> Vec<PositionCall> {
    calls
        .iter()
        .filter(|c| c.state == State::Crosslink as u8)
        .copied()
        .collect()
}

/// Run of crosslink sites in an interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub strand: Strand,
    pub interval: usize,
    /// First site, inclusive.
    pub start: usize,
    /// Last site, inclusive.
    pub end: usize,
    pub sites: usize,
    /// Sum of the scores of the sites.
    pub score: f64,
}

/// Merge crosslink sites of the same interval into regions, if they are at most `max_distance` apart.
/// `calls` should be ordered as [position_calls] returns. A site before the end of the current region
/// starts a new region.
pub fn merge_regions(calls: &[PositionCall], max_distance: usize) -> Vec<Region> {
    let mut regions: Vec<Region> = vec![];
    for site in calls.iter().filter(|c| c.state == State::Crosslink as u8) {
        match regions.last_mut() {
            Some(region)
                if region.strand == site.strand
                    && region.interval == site.interval
                    && region.end <= site.position
                    && site.position - region.end <= max_distance =>
            {
                region.end = site.position;
                region.sites += 1;
                region.score += site.score;
            }
            _ => regions.push(Region {
                strand: site.strand,
                interval: site.interval,
                start: site.position,
                end: site.position,
                sites: 1,
                score: site.score,
            }),
        }
    }
    regions
}
