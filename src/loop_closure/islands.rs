//! Grouping of place-index candidates into temporally contiguous islands.

use crate::loop_closure::place_index::PlaceMatch;
use crate::loop_closure::types::{IslandScoring, MatchIsland};

/// Clusters candidates into islands.
///
/// Candidates are sorted by id; consecutive ones at most `max_gap` ids
/// apart share an island. Islands with fewer than `min_matches` members are
/// dropped. Each island's score aggregates its members' scores with
/// `scoring`; `best_id`/`best_score` is its highest-scoring member.
pub fn compute_islands(
    candidates: &[PlaceMatch],
    max_gap: u64,
    min_matches: usize,
    scoring: IslandScoring,
) -> Vec<MatchIsland> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by_key(|(id, _)| *id);

    let mut islands = Vec::new();
    let mut group: Vec<PlaceMatch> = Vec::new();
    for candidate in sorted {
        if let Some(&(last_id, _)) = group.last() {
            if candidate.0.gap_from(last_id) > max_gap {
                islands.extend(close_island(&group, min_matches, scoring));
                group.clear();
            }
        }
        group.push(candidate);
    }
    islands.extend(close_island(&group, min_matches, scoring));
    islands
}

fn close_island(group: &[PlaceMatch], min_matches: usize, scoring: IslandScoring) -> Option<MatchIsland> {
    let (first, last) = (group.first()?, group.last()?);
    if group.len() < min_matches.max(1) {
        return None;
    }
    let scores: Vec<f64> = group.iter().map(|(_, s)| *s).collect();
    let mut island = MatchIsland::with_score(first.0, last.0, scoring.aggregate(&scores));
    let (best_id, best_score) = group
        .iter()
        .copied()
        .fold(*first, |best, c| if c.1 > best.1 { c } else { best });
    island.best_id = best_id;
    island.best_score = best_score;
    Some(island)
}

/// Highest-scoring island; ties keep the earliest.
pub fn select_best_island(islands: &[MatchIsland]) -> Option<MatchIsland> {
    islands.iter().copied().fold(None, |best, island| match best {
        Some(b) if b >= island => Some(b),
        _ => Some(island),
    })
}
