use common::id::WorkerId;
use common::RcSet;
use graph::thunk::ThunkRef;

fn affinity_has(tref: &ThunkRef, worker: WorkerId) -> bool {
    tref.get().affinity.iter().any(|&(w, _)| w == worker)
}

/// Pick the next thunk to fire on `worker` from the ready sequence (kept
/// sorted with the highest priority at the end), or `None` if nothing
/// suits it.
///
/// Tiers, in order: the fast path when the previous completion unblocked
/// exactly one dependent whose data already sits on `worker`; the first
/// thunk (highest priority first) preferring `worker`; the first thunk
/// with no placement preference at all; the first thunk whose preferred
/// workers are all gone and which would otherwise starve.
pub fn pop_with_affinity(
    ready: &mut Vec<ThunkRef>,
    worker: WorkerId,
    live: &RcSet<WorkerId>,
    immediate_next: bool,
) -> Option<ThunkRef> {
    if ready.is_empty() {
        return None;
    }

    if immediate_next && affinity_has(ready.last().unwrap(), worker) {
        return ready.pop();
    }

    for i in (0..ready.len()).rev() {
        if affinity_has(&ready[i], worker) {
            return Some(ready.remove(i));
        }
    }

    for i in (0..ready.len()).rev() {
        if ready[i].get().affinity.is_empty() {
            return Some(ready.remove(i));
        }
    }

    for i in (0..ready.len()).rev() {
        let unreachable = ready[i]
            .get()
            .affinity
            .iter()
            .all(|&(w, _)| !live.contains(&w));
        if unreachable {
            return Some(ready.remove(i));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use common::id::WorkerId;
    use common::RcSet;
    use graph::thunk::{ThunkInput, ThunkRef};
    use super::pop_with_affinity;

    fn thunk_with_affinity(affinity: Vec<(WorkerId, u64)>) -> ThunkRef {
        let t = ThunkRef::new("identity", vec![ThunkInput::Value(0.into())]);
        t.get_mut().affinity = affinity;
        t
    }

    fn live(ids: &[u32]) -> RcSet<WorkerId> {
        ids.iter().map(|&i| WorkerId(i)).collect()
    }

    #[test]
    fn fast_path_pops_the_last_ready_thunk() {
        let a = thunk_with_affinity(vec![(WorkerId(1), 10)]);
        let b = thunk_with_affinity(vec![(WorkerId(1), 10)]);
        let mut ready = vec![a.clone(), b.clone()];
        let got = pop_with_affinity(&mut ready, WorkerId(1), &live(&[1]), true).unwrap();
        assert_eq!(got, b);
        assert_eq!(ready, vec![a]);
    }

    #[test]
    fn affinity_match_scans_from_the_high_priority_end() {
        let a = thunk_with_affinity(vec![(WorkerId(2), 1)]);
        let b = thunk_with_affinity(vec![(WorkerId(1), 1)]);
        let c = thunk_with_affinity(vec![(WorkerId(2), 1)]);
        let mut ready = vec![b.clone(), a.clone(), c.clone()];
        let got = pop_with_affinity(&mut ready, WorkerId(2), &live(&[1, 2]), false).unwrap();
        assert_eq!(got, c);
        let got = pop_with_affinity(&mut ready, WorkerId(2), &live(&[1, 2]), false).unwrap();
        assert_eq!(got, a);
        assert_eq!(ready, vec![b]);
    }

    #[test]
    fn orphans_go_to_anyone() {
        let a = thunk_with_affinity(vec![(WorkerId(2), 1)]);
        let b = thunk_with_affinity(vec![]);
        let mut ready = vec![b.clone(), a.clone()];
        let got = pop_with_affinity(&mut ready, WorkerId(1), &live(&[1, 2]), false).unwrap();
        assert_eq!(got, b);
        // `a` prefers the live worker 2, so worker 1 leaves it alone
        assert!(pop_with_affinity(&mut ready, WorkerId(1), &live(&[1, 2]), false).is_none());
    }

    #[test]
    fn unreachable_affinities_are_swept() {
        let a = thunk_with_affinity(vec![(WorkerId(9), 1)]);
        let mut ready = vec![a.clone()];
        let got = pop_with_affinity(&mut ready, WorkerId(1), &live(&[1, 2]), false).unwrap();
        assert_eq!(got, a);
        assert!(ready.is_empty());
    }
}
