use crate::domain::cluster::entities::Member;

/// What the reconciler does with the member set this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberPlan {
    /// Live ordinals are exactly `[0, replicas)`.
    Steady,
    /// Ordinals below the target are absent; the workload is asked to create them.
    ScaleUp { missing: Vec<u32> },
    /// Remove the highest surviving ordinal.
    ScaleDown { victim: u32 },
    /// The highest ordinal should go but its removal would break quorum.
    Deferred { victim: u32, reason: String },
    /// Target is zero: members are drained one per pass without a quorum gate.
    Teardown { victim: u32 },
}

impl MemberPlan {
    pub fn removes(&self) -> Option<u32> {
        match self {
            MemberPlan::ScaleDown { victim } | MemberPlan::Teardown { victim } => Some(*victim),
            _ => None,
        }
    }
}

/// Strict majority of `n` voters.
pub fn majority(n: usize) -> usize {
    n / 2 + 1
}

/// Plans a single step toward live ordinals `[0, desired)`.
///
/// A removal is a RAFT membership change: it must commit on a majority of the
/// current configuration (the leaving member votes too), and the configuration left
/// behind must still hold a ready majority of its own.
pub fn plan_members(desired: u32, members: &[Member]) -> MemberPlan {
    let victim = members
        .iter()
        .map(|m| m.ordinal)
        .filter(|ordinal| *ordinal >= desired)
        .max();

    if let Some(victim) = victim {
        if desired == 0 {
            return MemberPlan::Teardown { victim };
        }

        let size = members.len();
        let ready_before = members.iter().filter(|m| m.ready).count();
        let ready_after = members
            .iter()
            .filter(|m| m.ready && m.ordinal != victim)
            .count();

        if ready_before < majority(size) {
            return MemberPlan::Deferred {
                victim,
                reason: format!(
                    "only {ready_before}/{size} members ready, removal of ordinal {victim} cannot commit"
                ),
            };
        }
        if ready_after < majority(size - 1) {
            return MemberPlan::Deferred {
                victim,
                reason: format!(
                    "removing ordinal {victim} would leave {ready_after}/{} ready members",
                    size - 1
                ),
            };
        }
        return MemberPlan::ScaleDown { victim };
    }

    let missing: Vec<u32> = (0..desired)
        .filter(|ordinal| !members.iter().any(|m| m.ordinal == *ordinal))
        .collect();
    if missing.is_empty() {
        MemberPlan::Steady
    } else {
        MemberPlan::ScaleUp { missing }
    }
}

/// Replica count handed to the workload. It never shrinks below the live set, so
/// removals only ever happen through the one-at-a-time path.
pub fn ensure_target(desired: u32, members: &[Member]) -> u32 {
    members
        .iter()
        .map(|m| m.ordinal + 1)
        .max()
        .unwrap_or(0)
        .max(desired)
}
