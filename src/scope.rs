//! The longest-prefix scope database (SPEC_FULL.md §4.2).
//!
//! Ported from `original_source/superpowers/nets.py`'s `Scope`/`Node`/`Nets`
//! classes: a `Nets` maps an integer network address to a `Node`, and a
//! `Node` holds every `Scope` rooted at that address, sorted by decreasing
//! prefix length so the first entry whose prefix length fits the query wins.

use std::collections::HashMap;
use std::fmt;

use crate::ip_address::{Address, Network};
use crate::power::PowerHandle;

/// One of the four query-handling modes a [`Scope`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    First,
    Last,
    Always,
    Never,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::First => "first",
            Mode::Last => "last",
            Mode::Always => "always",
            Mode::Never => "never",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::error::SuperpowersError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(Mode::First),
            "last" => Ok(Mode::Last),
            "always" => Ok(Mode::Always),
            "never" => Ok(Mode::Never),
            other => Err(crate::error::SuperpowersError::Configuration(format!(
                "unrecognized mode: {other}"
            ))),
        }
    }
}

/// A rewriting rule attached to a specific `(network, prefix)` pair.
#[derive(Debug, Clone)]
pub struct Scope {
    pub prefix_length: u8,
    pub mode: Mode,
    /// Always normalized to end with `.` unless empty, per SPEC_FULL.md §3.
    fqdn: String,
    pub powers: Vec<PowerHandle>,
}

impl Scope {
    pub fn new(prefix_length: u8, mode: Mode, fqdn: &str, powers: Vec<PowerHandle>) -> Self {
        let fqdn = if fqdn.is_empty() {
            String::new()
        } else if fqdn.ends_with('.') {
            fqdn.to_string()
        } else {
            format!("{fqdn}.")
        };
        Scope {
            prefix_length,
            mode,
            fqdn,
            powers,
        }
    }

    /// The fallback FQDN, dot-terminated, or empty if none was configured.
    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    pub fn applicable(&self) -> bool {
        !self.powers.is_empty()
    }
}

/// All [`Scope`]s rooted at one network address, ordered by decreasing
/// prefix length (longest/most-specific first).
#[derive(Debug, Default)]
struct Node {
    scopes: Vec<Scope>,
}

impl Node {
    fn add_scope(&mut self, scope: Scope) {
        if let Some(existing) = self
            .scopes
            .iter_mut()
            .find(|s| s.prefix_length == scope.prefix_length)
        {
            *existing = scope;
        } else {
            self.scopes.push(scope);
        }
        self.scopes.sort_by(|a, b| b.prefix_length.cmp(&a.prefix_length));
    }

    /// The most specific scope whose prefix length is `<= bits`.
    fn get_scope(&self, bits: u8) -> Option<&Scope> {
        self.scopes.iter().find(|s| s.prefix_length <= bits)
    }
}

/// The scope database: `network address (as integer) -> Node`.
#[derive(Debug, Default)]
pub struct Nets {
    nodes: HashMap<u32, Node>,
}

impl Nets {
    pub fn new() -> Self {
        Nets::default()
    }

    /// Attach `scope` to the node rooted at `network`.
    pub fn insert(&mut self, network: Network, scope: Scope) {
        self.nodes
            .entry(network.address.as_u32())
            .or_default()
            .add_scope(scope);
    }

    /// Longest-prefix-match lookup, per SPEC_FULL.md §4.2.
    ///
    /// For `i` in `0..=31`, mask the address down to `32 - i` bits; if a
    /// node exists there, return its most specific scope with
    /// `prefix_length <= 32 - i`. The first node hit that yields a match
    /// wins, even if a less-specific node further out could also match.
    pub fn find(&self, addr: Address) -> Option<&Scope> {
        let a = addr.as_u32();
        for i in 0..=31u8 {
            let mask: u32 = if i == 32 { 0 } else { !((1u32 << i).wrapping_sub(1)) };
            let candidate = a & mask;
            if let Some(node) = self.nodes.get(&candidate) {
                let bits = 32 - i;
                if let Some(scope) = node.get_scope(bits) {
                    return Some(scope);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Network {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn scope_stacking_picks_most_specific_at_exact_address() {
        let mut nets = Nets::new();
        nets.insert(net("10.0.0.0/8"), Scope::new(8, Mode::Last, "office", vec![]));
        nets.insert(
            net("10.0.0.0/24"),
            Scope::new(24, Mode::Always, "lab", vec![]),
        );
        nets.insert(
            net("10.0.0.0/32"),
            Scope::new(32, Mode::First, "gateway", vec![]),
        );

        assert_eq!(nets.find(addr("10.0.0.0")).unwrap().fqdn(), "gateway.");
        assert_eq!(nets.find(addr("10.0.0.5")).unwrap().fqdn(), "lab.");
        assert_eq!(nets.find(addr("10.0.5.5")).unwrap().fqdn(), "office.");
    }

    #[test]
    fn last_writer_wins_at_same_slot() {
        let mut nets = Nets::new();
        nets.insert(net("10.0.0.0/24"), Scope::new(24, Mode::First, "a", vec![]));
        nets.insert(net("10.0.0.0/24"), Scope::new(24, Mode::Last, "b", vec![]));
        let scope = nets.find(addr("10.0.0.1")).unwrap();
        assert_eq!(scope.fqdn(), "b.");
        assert_eq!(scope.mode, Mode::Last);
    }

    #[test]
    fn no_match_returns_none() {
        let nets = Nets::new();
        assert!(nets.find(addr("1.2.3.4")).is_none());
    }

    #[test]
    fn fqdn_normalization_appends_trailing_dot() {
        let scope = Scope::new(32, Mode::Last, "host.local", vec![]);
        assert_eq!(scope.fqdn(), "host.local.");
        let empty = Scope::new(32, Mode::Last, "", vec![]);
        assert_eq!(empty.fqdn(), "");
    }
}
