use common::id::{ProcKind, WorkerId};

/// Run-wide scheduling options, carried by the session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerOptions {
    /// Confine every dispatch to this worker.
    pub single: Option<WorkerId>,
    /// Acceptable processor kinds; empty means any.
    pub proc_kinds: Vec<ProcKind>,
}

/// Per-thunk scheduling options. Same shape as `SchedulerOptions`; merged
/// per dispatch with the thunk-local `single` taking precedence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThunkOptions {
    pub single: Option<WorkerId>,
    pub proc_kinds: Vec<ProcKind>,
}

impl SchedulerOptions {
    /// Resolve the effective options for one dispatch. The thunk-local
    /// `single` wins when set; `proc_kinds` are concatenated, scheduler
    /// side first.
    pub fn merge(&self, thunk: Option<&ThunkOptions>) -> ThunkOptions {
        match thunk {
            None => ThunkOptions {
                single: self.single,
                proc_kinds: self.proc_kinds.clone(),
            },
            Some(t) => {
                let mut kinds = self.proc_kinds.clone();
                kinds.extend(t.proc_kinds.iter().cloned());
                ThunkOptions {
                    single: t.single.or(self.single),
                    proc_kinds: kinds,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_thunk_single() {
        let s = SchedulerOptions {
            single: Some(WorkerId(1)),
            proc_kinds: vec![ProcKind::Cpu],
        };
        let t = ThunkOptions {
            single: Some(WorkerId(2)),
            proc_kinds: vec![ProcKind::Gpu],
        };
        let m = s.merge(Some(&t));
        assert_eq!(m.single, Some(WorkerId(2)));
        assert_eq!(m.proc_kinds, vec![ProcKind::Cpu, ProcKind::Gpu]);
    }

    #[test]
    fn merge_falls_back_to_scheduler_single() {
        let s = SchedulerOptions {
            single: Some(WorkerId(1)),
            proc_kinds: vec![],
        };
        let t = ThunkOptions::default();
        assert_eq!(s.merge(Some(&t)).single, Some(WorkerId(1)));
        assert_eq!(s.merge(None).single, Some(WorkerId(1)));
    }
}
