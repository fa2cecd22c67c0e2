use crate::error::{PipelineError, Result};
use crate::similarity::SimilarityScorer;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Indices into the candidate-name list that belong to one company.
pub type Cluster = Vec<usize>;

pub const FALLBACK_CLUSTER_NAME: &str = "cluster";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// Single pass, seeded by the first unvisited name. A name joins a
    /// cluster only if it matches the seed itself.
    #[default]
    Greedy,
    /// Connected components of the "score >= threshold" graph.
    #[serde(rename = "transitive")]
    TransitiveClosure,
}

pub struct Clusterer<S: SimilarityScorer> {
    scorer: S,
    threshold: u8,
    mode: ClusterMode,
}

impl<S: SimilarityScorer> Clusterer<S> {
    pub fn new(scorer: S, threshold: u8) -> Result<Self> {
        if threshold > 100 {
            return Err(PipelineError::InvalidThreshold(threshold));
        }
        Ok(Self {
            scorer,
            threshold,
            mode: ClusterMode::Greedy,
        })
    }

    pub fn with_mode(mut self, mode: ClusterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Partition `names` into clusters, emitted in order of their lowest index.
    pub fn cluster<T: AsRef<str>>(&self, names: &[T]) -> Vec<Cluster> {
        match self.mode {
            ClusterMode::Greedy => self.cluster_greedy(names),
            ClusterMode::TransitiveClosure => self.cluster_transitive(names),
        }
    }

    fn is_match(&self, a: &str, b: &str) -> bool {
        let score = self.scorer.score(a, b);
        debug!("similarity('{}', '{}') = {:.2}", a, b, score);
        score >= f64::from(self.threshold)
    }

    fn cluster_greedy<T: AsRef<str>>(&self, names: &[T]) -> Vec<Cluster> {
        let mut visited = vec![false; names.len()];
        let mut clusters = Vec::new();

        for i in 0..names.len() {
            if visited[i] {
                continue;
            }
            visited[i] = true;
            let mut cluster = vec![i];

            for j in (i + 1)..names.len() {
                if visited[j] {
                    continue;
                }
                if self.is_match(names[i].as_ref(), names[j].as_ref()) {
                    visited[j] = true;
                    cluster.push(j);
                }
            }

            clusters.push(cluster);
        }

        clusters
    }

    fn cluster_transitive<T: AsRef<str>>(&self, names: &[T]) -> Vec<Cluster> {
        let mut visited = vec![false; names.len()];
        let mut clusters = Vec::new();

        for seed in 0..names.len() {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut cluster = vec![seed];
            let mut frontier = vec![seed];

            while let Some(current) = frontier.pop() {
                for j in 0..names.len() {
                    if visited[j] {
                        continue;
                    }
                    if self.is_match(names[current].as_ref(), names[j].as_ref()) {
                        visited[j] = true;
                        cluster.push(j);
                        frontier.push(j);
                    }
                }
            }

            cluster.sort_unstable();
            clusters.push(cluster);
        }

        clusters
    }
}

/// Most frequent name; ties go to the lexicographically smallest.
pub fn pick_representative<T: AsRef<str>>(names: &[T]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *counts.entry(name.as_ref()).or_insert(0) += 1;
    }

    // BTreeMap iterates in ascending order, so the first maximum wins ties
    let mut best: Option<(&str, usize)> = None;
    for (name, count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((name, count)),
        }
    }

    best.map(|(name, _)| name.to_string())
        .unwrap_or_else(|| FALLBACK_CLUSTER_NAME.to_string())
}
