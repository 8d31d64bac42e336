//! Network information: ranked interface lists per address family
//!
//! The daemon builds an `NwiState` with `NwiStateBuilder`, which fixes the
//! order once. Clients only walk that order; there is no way to edit a
//! state after it is built.

use std::cmp::Ordering;
use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::service::Service;
use crate::snapshot::SnapshotPayload;

bitflags! {
    /// Connectivity of an interface
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IfStateFlags: u64 {
        /// has IPv4 connectivity
        const HAS_IPV4 = 0x1;
        /// has IPv6 connectivity
        const HAS_IPV6 = 0x2;
        /// has DNS configured
        const HAS_DNS = 0x4;
    }
}

/// Address family of a ranked list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    /// Connectivity flag implied by a record in this family's list
    pub fn connectivity_flag(self) -> IfStateFlags {
        match self {
            AddressFamily::Inet => IfStateFlags::HAS_IPV4,
            AddressFamily::Inet6 => IfStateFlags::HAS_IPV6,
        }
    }
}

/// Result of comparing the rank of two interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankOrder {
    /// Ranked equally
    Equal,
    /// The first interface is ranked ahead of the second
    AFirst,
    /// The second interface is ranked ahead of the first
    BFirst,
}

impl From<Ordering> for RankOrder {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => RankOrder::AFirst,
            Ordering::Equal => RankOrder::Equal,
            Ordering::Greater => RankOrder::BFirst,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IfRecord {
    name: String,
    flags: u64,
    rank: u32,
}

/// Interface state for both address families, each list in rank order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NwiState {
    ipv4: Vec<IfRecord>,
    ipv6: Vec<IfRecord>,
}

impl NwiState {
    pub fn builder() -> NwiStateBuilder {
        NwiStateBuilder::default()
    }

    fn list(&self, af: AddressFamily) -> &[IfRecord] {
        match af {
            AddressFamily::Inet => &self.ipv4,
            AddressFamily::Inet6 => &self.ipv6,
        }
    }

    /// The highest priority interface for `af`, if any
    pub fn first_ifstate(&self, af: AddressFamily) -> Option<NwiIfState<'_>> {
        self.at(af, 0)
    }

    /// The interface following `ifstate` in the `af` list.
    ///
    /// When `af` is not the family of `ifstate`, the walk continues after the
    /// interface of the same name in the `af` list.
    pub fn next_ifstate<'a>(
        &'a self,
        ifstate: &NwiIfState<'_>,
        af: AddressFamily,
    ) -> Option<NwiIfState<'a>> {
        let position = if ifstate.family == af {
            ifstate.index
        } else {
            self.position(af, ifstate.name())?
        };
        self.at(af, position + 1)
    }

    /// Look up an interface by name, IPv4 list first
    pub fn ifstate(&self, name: &str) -> Option<NwiIfState<'_>> {
        [AddressFamily::Inet, AddressFamily::Inet6]
            .into_iter()
            .find_map(|af| self.position(af, name).and_then(|index| self.at(af, index)))
    }

    /// Number of interfaces ranked for `af`
    pub fn interface_count(&self, af: AddressFamily) -> usize {
        self.list(af).len()
    }

    /// Iterate the `af` list from the highest priority interface
    pub fn interfaces(&self, af: AddressFamily) -> Interfaces<'_> {
        Interfaces {
            next: self.first_ifstate(af),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    fn at(&self, af: AddressFamily, index: usize) -> Option<NwiIfState<'_>> {
        (index < self.list(af).len()).then_some(NwiIfState {
            state: self,
            family: af,
            index,
        })
    }

    fn position(&self, af: AddressFamily, name: &str) -> Option<usize> {
        self.list(af).iter().position(|r| r.name == name)
    }
}

impl SnapshotPayload for NwiState {
    const SERVICE: Service = Service::NetworkInformation;

    fn padding_hint(&self) -> u32 {
        ((self.ipv4.len() + self.ipv6.len()) * 16) as u32
    }

    /// Lists must arrive in rank order with no interface listed twice
    fn is_consistent(&self) -> bool {
        [&self.ipv4, &self.ipv6].into_iter().all(|list| {
            let ordered = list.windows(2).all(|w| w[0].rank <= w[1].rank);
            let mut names: Vec<&str> = list.iter().map(|r| r.name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            ordered && names.len() == list.len()
        })
    }
}

/// One interface's entry in one address family's ranked list
#[derive(Debug, Clone, Copy)]
pub struct NwiIfState<'a> {
    state: &'a NwiState,
    family: AddressFamily,
    index: usize,
}

impl<'a> NwiIfState<'a> {
    fn record(&self) -> &'a IfRecord {
        &self.state.list(self.family)[self.index]
    }

    pub fn name(&self) -> &'a str {
        &self.record().name
    }

    pub fn flags(&self) -> IfStateFlags {
        IfStateFlags::from_bits_truncate(self.record().flags)
    }

    pub fn rank(&self) -> u32 {
        self.record().rank
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Position in the family's list (0 is the highest priority)
    pub fn position(&self) -> usize {
        self.index
    }

    /// The next, lower priority interface in the same family
    pub fn next(&self) -> Option<NwiIfState<'a>> {
        self.state.at(self.family, self.index + 1)
    }

    pub fn compare_rank(&self, other: &NwiIfState<'_>) -> RankOrder {
        compare_rank(self, other)
    }
}

/// Compare the relative rank of two interfaces.
///
/// Only the stored rank is compared, so two handles to the same logical
/// interface compare equal even when taken from different snapshots.
pub fn compare_rank(a: &NwiIfState<'_>, b: &NwiIfState<'_>) -> RankOrder {
    a.rank().cmp(&b.rank()).into()
}

/// Iterator over one address family's ranked list
pub struct Interfaces<'a> {
    next: Option<NwiIfState<'a>>,
}

impl<'a> Iterator for Interfaces<'a> {
    type Item = NwiIfState<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.next();
        Some(current)
    }
}

struct PendingInterface {
    family: AddressFamily,
    name: String,
    flags: IfStateFlags,
    rank: Option<u32>,
}

/// Builds an `NwiState`, fixing the rank order of each family
#[derive(Default)]
pub struct NwiStateBuilder {
    pending: Vec<PendingInterface>,
}

impl NwiStateBuilder {
    /// Add an interface ranked after everything already added for `af`
    pub fn add(mut self, af: AddressFamily, name: impl Into<String>, flags: IfStateFlags) -> Self {
        self.pending.push(PendingInterface {
            family: af,
            name: name.into(),
            flags,
            rank: None,
        });
        self
    }

    /// Add an interface with an explicit rank (lower is higher priority)
    pub fn add_ranked(
        mut self,
        af: AddressFamily,
        name: impl Into<String>,
        flags: IfStateFlags,
        rank: u32,
    ) -> Self {
        self.pending.push(PendingInterface {
            family: af,
            name: name.into(),
            flags,
            rank: Some(rank),
        });
        self
    }

    /// Sort each family by rank.
    ///
    /// An interface without an explicit rank is ranked one past the highest
    /// rank already present in its family. Ties keep insertion order. A name added twice to
    /// the same family keeps its first entry. The flags of an interface are
    /// the union of its entries across families.
    pub fn build(self) -> NwiState {
        let mut merged: HashMap<&str, IfStateFlags> = HashMap::new();
        for p in &self.pending {
            *merged.entry(p.name.as_str()).or_default() |= p.flags | p.family.connectivity_flag();
        }

        let mut state = NwiState::default();
        for af in [AddressFamily::Inet, AddressFamily::Inet6] {
            let mut list: Vec<IfRecord> = Vec::new();
            for p in self.pending.iter().filter(|p| p.family == af) {
                if list.iter().any(|r| r.name == p.name) {
                    continue;
                }
                let rank = p.rank.unwrap_or_else(|| {
                    list.iter()
                        .map(|r| r.rank)
                        .max()
                        .map_or(0, |highest| highest.saturating_add(1))
                });
                list.push(IfRecord {
                    name: p.name.clone(),
                    flags: merged.get(p.name.as_str()).copied().unwrap_or_default().bits(),
                    rank,
                });
            }
            list.sort_by_key(|r| r.rank);
            match af {
                AddressFamily::Inet => state.ipv4 = list,
                AddressFamily::Inet6 => state.ipv6 = list,
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NwiState {
        NwiState::builder()
            .add(AddressFamily::Inet, "en0", IfStateFlags::HAS_DNS)
            .add(AddressFamily::Inet, "en1", IfStateFlags::empty())
            .add(AddressFamily::Inet, "utun0", IfStateFlags::HAS_DNS)
            .add(AddressFamily::Inet6, "en1", IfStateFlags::empty())
            .add(AddressFamily::Inet6, "en0", IfStateFlags::HAS_DNS)
            .build()
    }

    #[test]
    fn test_walk_visits_each_member_once() {
        let state = sample();
        for af in [AddressFamily::Inet, AddressFamily::Inet6] {
            let mut seen = Vec::new();
            let mut current = state.first_ifstate(af);
            while let Some(ifstate) = current {
                seen.push(ifstate.name().to_string());
                current = ifstate.next();
            }
            assert_eq!(seen.len(), state.interface_count(af));
            let mut unique = seen.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), seen.len());
        }

        let names: Vec<&str> = state.interfaces(AddressFamily::Inet).map(|i| i.name()).collect();
        assert_eq!(names, ["en0", "en1", "utun0"]);
    }

    #[test]
    fn test_empty_family_has_no_first() {
        let state = NwiState::builder()
            .add(AddressFamily::Inet, "en0", IfStateFlags::empty())
            .build();
        assert!(state.first_ifstate(AddressFamily::Inet6).is_none());
        assert_eq!(state.interfaces(AddressFamily::Inet6).count(), 0);
        assert!(NwiState::default().is_empty());
    }

    #[test]
    fn test_compare_rank_reflexive_and_antisymmetric() {
        let state = sample();
        let all: Vec<_> = state.interfaces(AddressFamily::Inet).collect();
        for a in &all {
            assert_eq!(compare_rank(a, a), RankOrder::Equal);
            for b in &all {
                match compare_rank(a, b) {
                    RankOrder::AFirst => assert_eq!(compare_rank(b, a), RankOrder::BFirst),
                    RankOrder::BFirst => assert_eq!(compare_rank(b, a), RankOrder::AFirst),
                    RankOrder::Equal => assert_eq!(compare_rank(b, a), RankOrder::Equal),
                }
            }
        }
    }

    #[test]
    fn test_compare_rank_ignores_identity() {
        let one = sample();
        let two = sample();
        let a = one.ifstate("en1").unwrap();
        let b = two.ifstate("en1").unwrap();
        assert_eq!(a.compare_rank(&b), RankOrder::Equal);
    }

    #[test]
    fn test_flags_merged_across_families() {
        let state = sample();
        let en0 = state.ifstate("en0").unwrap();
        assert_eq!(
            en0.flags(),
            IfStateFlags::HAS_IPV4 | IfStateFlags::HAS_IPV6 | IfStateFlags::HAS_DNS
        );
        let utun0 = state.ifstate("utun0").unwrap();
        assert_eq!(utun0.flags(), IfStateFlags::HAS_IPV4 | IfStateFlags::HAS_DNS);
    }

    #[test]
    fn test_next_across_families() {
        let state = sample();
        let en1_v4 = state.first_ifstate(AddressFamily::Inet).unwrap().next().unwrap();
        assert_eq!(en1_v4.name(), "en1");
        // en1 is first in the IPv6 list, so the IPv6 walk continues at en0
        let next_v6 = state.next_ifstate(&en1_v4, AddressFamily::Inet6).unwrap();
        assert_eq!(next_v6.name(), "en0");
        assert_eq!(next_v6.family(), AddressFamily::Inet6);

        let utun0 = state.ifstate("utun0").unwrap();
        assert!(state.next_ifstate(&utun0, AddressFamily::Inet6).is_none());
    }

    #[test]
    fn test_explicit_ranks_sorted_and_ties_equal() {
        let state = NwiState::builder()
            .add_ranked(AddressFamily::Inet, "en2", IfStateFlags::empty(), 20)
            .add_ranked(AddressFamily::Inet, "en0", IfStateFlags::empty(), 5)
            .add_ranked(AddressFamily::Inet, "en1", IfStateFlags::empty(), 20)
            .build();
        let names: Vec<&str> = state.interfaces(AddressFamily::Inet).map(|i| i.name()).collect();
        assert_eq!(names, ["en0", "en2", "en1"]);

        let en2 = state.ifstate("en2").unwrap();
        let en1 = state.ifstate("en1").unwrap();
        assert_eq!(compare_rank(&en2, &en1), RankOrder::Equal);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_unranked_after_highest_explicit_rank() {
        let state = NwiState::builder()
            .add_ranked(AddressFamily::Inet, "en0", IfStateFlags::empty(), 5)
            .add(AddressFamily::Inet, "en1", IfStateFlags::empty())
            .add_ranked(AddressFamily::Inet6, "en2", IfStateFlags::empty(), 3)
            .add(AddressFamily::Inet6, "en3", IfStateFlags::empty())
            .add_ranked(AddressFamily::Inet6, "en4", IfStateFlags::empty(), 1)
            .build();
        let v4: Vec<&str> = state.interfaces(AddressFamily::Inet).map(|i| i.name()).collect();
        assert_eq!(v4, ["en0", "en1"]);
        assert_eq!(state.ifstate("en1").unwrap().rank(), 6);

        let v6: Vec<&str> = state.interfaces(AddressFamily::Inet6).map(|i| i.name()).collect();
        assert_eq!(v6, ["en4", "en2", "en3"]);
        assert!(state.is_consistent());

        // an explicit rank equal to an earlier implicit one ties, keeping insertion order
        let state = NwiState::builder()
            .add(AddressFamily::Inet, "en0", IfStateFlags::empty())
            .add_ranked(AddressFamily::Inet, "en1", IfStateFlags::empty(), 0)
            .build();
        let names: Vec<&str> = state.interfaces(AddressFamily::Inet).map(|i| i.name()).collect();
        assert_eq!(names, ["en0", "en1"]);
    }

    #[test]
    fn test_unranked_after_max_rank_saturates() {
        let state = NwiState::builder()
            .add_ranked(AddressFamily::Inet, "en0", IfStateFlags::empty(), u32::MAX)
            .add(AddressFamily::Inet, "en1", IfStateFlags::empty())
            .build();
        let names: Vec<&str> = state.interfaces(AddressFamily::Inet).map(|i| i.name()).collect();
        assert_eq!(names, ["en0", "en1"]);
        assert_eq!(state.ifstate("en1").unwrap().rank(), u32::MAX);
    }

    #[test]
    fn test_duplicate_name_keeps_first() {
        let state = NwiState::builder()
            .add(AddressFamily::Inet, "en0", IfStateFlags::empty())
            .add(AddressFamily::Inet, "en0", IfStateFlags::HAS_DNS)
            .build();
        assert_eq!(state.interface_count(AddressFamily::Inet), 1);
        // flags still merge
        assert!(state.ifstate("en0").unwrap().flags().contains(IfStateFlags::HAS_DNS));
    }

    #[test]
    fn test_out_of_order_lists_are_inconsistent() {
        let mut state = sample();
        state.ipv4.swap(0, 2);
        assert!(!state.is_consistent());
    }
}
