//! Evaluation aggregation.
//!
//! After the dev pass, every shard holds the full gathered `(sid, cid,
//! loss)` stream. Candidates are regrouped by question id and the candidate
//! with the highest per-sequence loss is reported as the prediction; ties
//! keep the earliest candidate in gathered order.

use std::collections::HashMap;

use crate::config::FinetuneError;

/// Gathered per-candidate results, grouped by question id.
pub type CandidateGroups = HashMap<u32, Vec<(u32, f32)>>;

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    /// Correct predictions over all questions in the truth set.
    pub accuracy: f64,
    /// Number of questions in the truth set.
    pub total: usize,
    pub correct: usize,
    /// Questions with no gathered candidates (typically lost to the
    /// sampler's drop-last truncation); these score as incorrect.
    pub missing: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EvalAggregator;

impl EvalAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Regroup gathered triples by question id, preserving gathered order
    /// within each group.
    pub fn group(
        &self,
        sids: &[u32],
        cids: &[u32],
        losses: &[f32],
    ) -> Result<CandidateGroups, FinetuneError> {
        if sids.len() != cids.len() || sids.len() != losses.len() {
            return Err(FinetuneError::runtime(format!(
                "gathered result lengths disagree: {} sids, {} cids, {} losses",
                sids.len(),
                cids.len(),
                losses.len()
            )));
        }

        let mut groups: CandidateGroups = HashMap::new();
        for ((&sid, &cid), &loss) in sids.iter().zip(cids).zip(losses) {
            groups.entry(sid).or_default().push((cid, loss));
        }
        Ok(groups)
    }

    /// Candidate id with the maximum loss; first occurrence wins ties.
    pub fn predict(&self, candidates: &[(u32, f32)]) -> Option<u32> {
        let mut best: Option<(u32, f32)> = None;
        for &(cid, loss) in candidates {
            match best {
                Some((_, best_loss)) if loss <= best_loss => {}
                _ => best = Some((cid, loss)),
            }
        }
        best.map(|(cid, _)| cid)
    }

    /// Score grouped candidates against the ground-truth labels.
    ///
    /// Questions absent from `groups` are surfaced through the `missing`
    /// count and a warning rather than silently shrinking the denominator.
    pub fn score(&self, groups: &CandidateGroups, truth_labels: &[u32]) -> EvalReport {
        let mut correct = 0;
        let mut missing = 0;

        for (sid, &truth) in truth_labels.iter().enumerate() {
            match groups.get(&(sid as u32)).and_then(|g| self.predict(g)) {
                Some(predicted) if predicted == truth => correct += 1,
                Some(_) => {}
                None => missing += 1,
            }
        }

        if missing > 0 {
            eprintln!(
                "warning: {} of {} questions had no gathered candidates and score as incorrect",
                missing,
                truth_labels.len()
            );
        }

        let total = truth_labels.len();
        EvalReport {
            accuracy: if total == 0 {
                0.0
            } else {
                correct as f64 / total as f64
            },
            total,
            correct,
            missing,
        }
    }

    /// Group and score in one call, as the evaluation loop uses it.
    pub fn aggregate(
        &self,
        sids: &[u32],
        cids: &[u32],
        losses: &[f32],
        truth_labels: &[u32],
    ) -> Result<EvalReport, FinetuneError> {
        let groups = self.group(sids, cids, losses)?;
        Ok(self.score(&groups, truth_labels))
    }
}
