//! Read Quorum
//!
//! Strong and bounded-staleness reads are answered by a majority of the
//! replica set, never by a single replica. The highest LSN among the
//! answers is selected. The read is consistent once a quorum has reached
//! that LSN, and for strong reads once it is globally committed too.

use super::model::StoreResponse;
use crate::errors::status;

/// Replicas that must answer a quorum read over `replica_count` replicas.
pub fn read_quorum(replica_count: usize) -> usize {
    replica_count - replica_count / 2
}

/// How a set of quorum read answers evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumResult {
    /// A quorum already agrees on the selected LSN.
    Met { selected: usize, lsn: i64 },
    /// Enough answers, but the selected LSN needs a read barrier.
    Selected { selected: usize, lsn: i64 },
    /// Fewer than a quorum of replicas answered.
    NotSelected { answered: usize },
}

/// Select the answer with the highest LSN and check the quorum holds it.
///
/// `selected` indexes `answers`; ties keep the first answer. With
/// `require_global_commit`, the highest global committed LSN reported must
/// also cover the selected LSN.
pub fn evaluate(answers: &[StoreResponse], quorum: usize, require_global_commit: bool) -> QuorumResult {
    if answers.is_empty() || answers.len() < quorum {
        return QuorumResult::NotSelected {
            answered: answers.len(),
        };
    }

    let mut selected = 0;
    for (index, answer) in answers.iter().enumerate() {
        if answer.lsn > answers[selected].lsn {
            selected = index;
        }
    }
    let lsn = answers[selected].lsn;
    let at_lsn = answers.iter().filter(|a| a.lsn == lsn).count();
    let global_committed = answers
        .iter()
        .map(|a| a.global_committed_lsn)
        .max()
        .unwrap_or(i64::MIN);

    if at_lsn >= quorum && (!require_global_commit || global_committed >= lsn) {
        QuorumResult::Met { selected, lsn }
    } else {
        QuorumResult::Selected { selected, lsn }
    }
}

/// Fold barrier answers into the progress a quorum has made.
///
/// The reported LSN is the highest one at least `quorum` replicas reached.
/// With `require_global_commit` the reported global committed LSN is capped
/// at that LSN, so a global-committed target is met only once both are.
pub fn quorum_progress(
    answers: &[StoreResponse],
    quorum: usize,
    require_global_commit: bool,
) -> Option<StoreResponse> {
    let mut lsns: Vec<i64> = answers.iter().map(|a| a.lsn).collect();
    lsns.sort_unstable_by(|a, b| b.cmp(a));
    let lsn = *lsns.get(quorum.checked_sub(1)?)?;
    let global_committed = answers.iter().map(|a| a.global_committed_lsn).max()?;

    let mut progress = StoreResponse::new(status::OK);
    progress.lsn = lsn;
    progress.global_committed_lsn = if require_global_commit {
        global_committed.min(lsn)
    } else {
        global_committed
    };
    Some(progress)
}
