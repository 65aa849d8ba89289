use super::{block_is_ignorably_cold, linkage_register, RegisterPickStrategy};
use crate::candidate::{CandidateId, CandidateRegistry};
use crate::config::GraConfig;
use crate::target::RegisterClassPolicy;
use gra_common::{GlobalRegisterNumber, RegisterKind, RegisterSet};
use gra_ir::Method;
use log::{debug, trace};
use std::fmt;

/// One step of a preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// The register the candidate arrives in
    Linkage,
    /// Any register preserved across calls
    Preserved,
    /// Any register not preserved across calls
    NonPreserved,
    /// A volatile register that carries no arguments; never chosen
    OtherVolatile,
    /// Any available register
    Any,
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Preference::Linkage => "L",
            Preference::Preserved => "P",
            Preference::NonPreserved => "N",
            Preference::OtherVolatile => "O",
            Preference::Any => "M",
        };
        write!(f, "{}", letter)
    }
}

/// Pressure-insensitive picker
pub struct PreferencePicker<'a> {
    method: &'a Method,
    policy: &'a dyn RegisterClassPolicy,
    config: &'a GraConfig,
}

impl<'a> PreferencePicker<'a> {
    pub fn new(method: &'a Method, policy: &'a dyn RegisterClassPolicy, config: &'a GraConfig) -> Self {
        Self { method, policy, config }
    }

    /// The order to try, given call-preservation knowledge, whether the
    /// candidate survives a call in a block that matters and whether it has
    /// a linkage register
    pub fn preference_order(
        knows_preserved: bool,
        live_across_call: bool,
        has_linkage: bool,
    ) -> &'static [Preference] {
        use Preference::*;
        match (knows_preserved, live_across_call, has_linkage) {
            (true, true, false) => &[Preserved, NonPreserved],
            (true, true, true) => &[Preserved, Linkage, OtherVolatile],
            (true, false, false) => &[NonPreserved, Preserved],
            (true, false, true) => &[Linkage, OtherVolatile, Preserved],
            (false, _, false) => &[Any],
            (false, _, true) => &[Linkage, Any],
        }
    }
}

impl RegisterPickStrategy for PreferencePicker<'_> {
    fn name(&self) -> &'static str {
        "preference"
    }

    fn pick(
        &mut self,
        registry: &CandidateRegistry,
        id: CandidateId,
        available: &RegisterSet,
        _high_half: bool,
    ) -> Option<GlobalRegisterNumber> {
        let candidate = registry.get(id);
        let withheld = match candidate.register_kind() {
            RegisterKind::Fpr => self.config.regs_withheld.fpr,
            _ => self.config.regs_withheld.gpr,
        };
        if available.len() <= withheld {
            debug!(
                "withholding {} registers from candidate #{}",
                available.len(),
                candidate.symref
            );
            return None;
        }

        let linkage = linkage_register(self.method, self.policy, candidate);
        let preserved = self.policy.linkage().preserved.as_ref();
        let live_across_call = preserved.is_some() && {
            let calls = self.method.call_blocks();
            candidate
                .blocks_live_on_entry
                .intersection(&calls)
                .any(|&b| !block_is_ignorably_cold(self.method, self.config, b))
        };
        let order = Self::preference_order(preserved.is_some(), live_across_call, linkage.is_some());
        trace!(
            "  candidate #{}: linkage {:?}, live across call {}, order {}",
            candidate.symref,
            linkage,
            live_across_call,
            order.iter().map(|p| p.to_string()).collect::<String>()
        );

        let chosen = order.iter().find_map(|preference| match preference {
            Preference::Linkage => linkage.filter(|r| available.contains(r)),
            Preference::Preserved => preserved.and_then(|p| available.intersection(p).next().copied()),
            // A parameter not given its own register gets no volatile one
            Preference::NonPreserved => preserved.and_then(|p| available.difference(p).next().copied()),
            Preference::OtherVolatile => None,
            Preference::Any => available.iter().next().copied(),
        });
        match chosen {
            Some(reg) => debug!(
                "picked register {} for candidate #{}",
                self.policy.register_file().name(reg),
                candidate.symref
            ),
            None => debug!("candidate #{} not assigned a register", candidate.symref),
        }
        chosen
    }
}
