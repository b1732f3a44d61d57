//! Node matching between source and target workflows.
//!
//! Pairs are found in three passes: stable identifier, exact (name, type),
//! then best structural similarity above a configured threshold. Every pass
//! walks nodes in their canonical order and breaks ties explicitly, so the
//! same inputs always yield the same pairs in the same order.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::config::MatcherConfig;
use crate::graph::{NormalizedNode, NormalizedWorkflow};

/// Matcher pairing nodes across two normalized workflows.
#[derive(Debug, Clone, Default)]
pub struct NodeMatcher {
    /// Similarity tuning.
    config: MatcherConfig,
}

/// How a pair was established.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MatchMethod {
    /// Same stable identifier on both sides.
    Id,
    /// Same name and type.
    NameType,
    /// Structural similarity above the threshold.
    Similarity {
        /// Weighted similarity score in [0, 1].
        score: f64,
    },
    /// No counterpart found.
    Unmatched,
}

/// A source/target node pair. At least one side is present.
#[derive(Debug, Clone, Copy)]
pub struct NodePair<'a> {
    /// Node in the source workflow.
    pub source: Option<&'a NormalizedNode>,
    /// Node in the target workflow.
    pub target: Option<&'a NormalizedNode>,
    /// How the pair was established.
    pub method: MatchMethod,
}

/// Structural fingerprint of a node used for similarity scoring.
struct Fingerprint {
    edges: BTreeSet<String>,
    params: BTreeSet<String>,
}

struct Candidate {
    score: f64,
    same_type: bool,
    distance: usize,
    source: usize,
    target: usize,
}

impl<'a> NodePair<'a> {
    /// Returns true if both sides are present.
    #[must_use]
    pub const fn is_matched(&self) -> bool {
        self.source.is_some() && self.target.is_some()
    }

    /// Name to display for the pair (target name when present).
    #[must_use]
    pub fn display_name(&self) -> &'a str {
        self.target
            .or(self.source)
            .map_or("", |node| node.name.as_str())
    }
}

impl NodeMatcher {
    /// Creates a matcher with the given tuning.
    #[must_use]
    pub const fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Pairs the nodes of two workflows.
    ///
    /// Output lists source nodes in source order (matched or not), followed
    /// by unmatched target nodes in target order.
    #[must_use]
    pub fn match_nodes<'a>(
        &self,
        source: &'a NormalizedWorkflow,
        target: &'a NormalizedWorkflow,
    ) -> Vec<NodePair<'a>> {
        let mut source_to_target: Vec<Option<(usize, MatchMethod)>> = vec![None; source.nodes.len()];
        let mut target_taken = vec![false; target.nodes.len()];

        // Pass 1: stable identifiers
        let mut target_by_id: HashMap<&str, usize> = HashMap::new();
        for (j, node) in target.nodes.iter().enumerate() {
            if let Some(id) = node.stable_id.as_deref() {
                target_by_id.entry(id).or_insert(j);
            }
        }
        for (i, node) in source.nodes.iter().enumerate() {
            if let Some(&j) = node.stable_id.as_deref().and_then(|id| target_by_id.get(id))
                && !target_taken[j]
            {
                source_to_target[i] = Some((j, MatchMethod::Id));
                target_taken[j] = true;
            }
        }

        // Pass 2: exact (name, type)
        for (i, node) in source.nodes.iter().enumerate() {
            if source_to_target[i].is_some() {
                continue;
            }
            let found = target.nodes.iter().enumerate().find(|(j, candidate)| {
                !target_taken[*j]
                    && candidate.name == node.name
                    && candidate.node_type == node.node_type
            });
            if let Some((j, _)) = found {
                source_to_target[i] = Some((j, MatchMethod::NameType));
                target_taken[j] = true;
            }
        }

        // Pass 3: structural similarity
        let remaining_source: Vec<usize> = (0..source.nodes.len())
            .filter(|&i| source_to_target[i].is_none())
            .collect();
        let remaining_target: Vec<usize> = (0..target.nodes.len())
            .filter(|&j| !target_taken[j])
            .collect();

        if !remaining_source.is_empty() && !remaining_target.is_empty() {
            for candidate in self.similarity_candidates(source, target, &remaining_source, &remaining_target) {
                if source_to_target[candidate.source].is_some() || target_taken[candidate.target] {
                    continue;
                }
                debug!(
                    "Matched '{}' -> '{}' by similarity {:.3}",
                    source.nodes[candidate.source].name, target.nodes[candidate.target].name, candidate.score
                );
                source_to_target[candidate.source] = Some((
                    candidate.target,
                    MatchMethod::Similarity {
                        score: candidate.score,
                    },
                ));
                target_taken[candidate.target] = true;
            }
        }

        let mut pairs: Vec<NodePair<'a>> = source
            .nodes
            .iter()
            .zip(&source_to_target)
            .map(|(node, matched)| match matched {
                Some((j, method)) => NodePair {
                    source: Some(node),
                    target: Some(&target.nodes[*j]),
                    method: *method,
                },
                None => NodePair {
                    source: Some(node),
                    target: None,
                    method: MatchMethod::Unmatched,
                },
            })
            .collect();

        pairs.extend(
            target
                .nodes
                .iter()
                .zip(&target_taken)
                .filter(|(_, taken)| !**taken)
                .map(|(node, _)| NodePair {
                    source: None,
                    target: Some(node),
                    method: MatchMethod::Unmatched,
                }),
        );

        pairs
    }

    /// Scores every remaining pair and returns those above the threshold,
    /// best first.
    fn similarity_candidates(
        &self,
        source: &NormalizedWorkflow,
        target: &NormalizedWorkflow,
        remaining_source: &[usize],
        remaining_target: &[usize],
    ) -> Vec<Candidate> {
        let source_prints: Vec<Fingerprint> = remaining_source
            .iter()
            .map(|&i| fingerprint(source, &source.nodes[i]))
            .collect();
        let target_prints: Vec<Fingerprint> = remaining_target
            .iter()
            .map(|&j| fingerprint(target, &target.nodes[j]))
            .collect();

        let total_weight = self.config.edge_weight + self.config.parameter_weight;
        if total_weight <= 0.0 {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (si, &i) in remaining_source.iter().enumerate() {
            for (tj, &j) in remaining_target.iter().enumerate() {
                let score = self.score(&source_prints[si], &target_prints[tj]);

                if score > self.config.similarity_threshold {
                    candidates.push(Candidate {
                        score,
                        same_type: source.nodes[i].node_type == target.nodes[j].node_type,
                        distance: levenshtein(&source.nodes[i].name, &target.nodes[j].name),
                        source: i,
                        target: j,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.same_type.cmp(&a.same_type))
                .then(a.distance.cmp(&b.distance))
                .then(a.source.cmp(&b.source))
                .then(a.target.cmp(&b.target))
        });
        candidates
    }

    /// Weighted similarity over the dimensions present on either side.
    ///
    /// Two nodes with no edges and no parameters score 1.
    fn score(&self, source: &Fingerprint, target: &Fingerprint) -> f64 {
        let dimensions = [
            (self.config.edge_weight, jaccard(&source.edges, &target.edges)),
            (self.config.parameter_weight, jaccard(&source.params, &target.params)),
        ];

        let (weighted, weight) = dimensions
            .iter()
            .filter_map(|&(weight, score)| score.map(|score| (weight * score, weight)))
            .fold((0.0, 0.0), |(sum, total), (value, weight)| (sum + value, total + weight));

        if weight > 0.0 { weighted / weight } else { 1.0 }
    }
}

/// Edge type signatures and parameter key paths of a node.
fn fingerprint(workflow: &NormalizedWorkflow, node: &NormalizedNode) -> Fingerprint {
    let type_of = |name: &str| workflow.node(name).map_or("?", |n| n.node_type.as_str());

    let mut edges = BTreeSet::new();
    for connection in &workflow.connections {
        if connection.from == node.name {
            edges.insert(format!(
                "out:{}:{}->{}",
                connection.kind,
                connection.from_output,
                type_of(&connection.to)
            ));
        }
        if connection.to == node.name {
            edges.insert(format!(
                "in:{}:{}<-{}",
                connection.kind,
                connection.to_input,
                type_of(&connection.from)
            ));
        }
    }

    let mut params = BTreeSet::new();
    for (key, value) in &node.parameters {
        params.insert(key.clone());
        params.extend(value.key_paths().into_iter().map(|path| format!("{key}.{path}")));
    }

    Fingerprint { edges, params }
}

/// Jaccard index of two sets; `None` when both are empty.
#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<f64> {
    let union = a.union(b).count();
    if union == 0 {
        return None;
    }
    Some(a.intersection(b).count() as f64 / union as f64)
}

/// Edit distance between two names, in characters.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}
