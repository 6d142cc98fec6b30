use std::collections::HashMap;

use crate::address::MavAddress;
use crate::config::{Action, Chain, Condition, ConfigFile, DefaultAction};
use crate::error::RouterError;
use crate::packet::Packet;

/// The maximum number of `call`/`goto` hops evaluated for a single packet
/// before giving up. Real configurations resolve in a handful of hops; this
/// only exists to turn an accidental chain cycle into an error instead of a
/// hang.
const MAX_JUMPS: usize = 10_000;

/// Something that decides whether a packet may pass through a connection
/// towards one particular candidate recipient.
///
/// `dest` is the address the connection is considering forwarding to for
/// this evaluation, not necessarily `packet.dest()` -- a broadcast or
/// component-broadcast packet is evaluated once per reachable candidate, so
/// the filter is asked, and may answer differently, for each one.
pub trait Filter: Send + Sync {
    /// `(accept, priority)`: whether the packet should be forwarded towards
    /// `dest`, and at what priority if so.
    fn will_accept(&self, packet: &Packet, dest: MavAddress) -> (bool, i16);
}

/// A filter with no rules that accepts everything at priority 0.
pub struct AcceptAll;

impl Filter for AcceptAll {
    fn will_accept(&self, _packet: &Packet, _dest: MavAddress) -> (bool, i16) {
        (true, 0)
    }
}

/// A filter built from the `chain` blocks of a configuration file.
///
/// Evaluation starts at `entry` and walks rules in order. A rule matches
/// when every one of its conditions matches; on a match, `accept`/`reject`
/// terminate evaluation immediately, `call <chain>` evaluates `<chain>` as a
/// subroutine (falling through to the rule after the `call` if the
/// sub-chain runs off its end without a terminal verdict), and
/// `goto <chain>` transfers control to `<chain>` without leaving a way back
/// -- if `<chain>` runs off its end, control returns to whichever `call`
/// frame is on the stack, exactly as if the `goto` had never happened. If a
/// chain runs off its end with no `call` frame left to return to, its
/// `default_action` is the final verdict.
pub struct RuleFilter {
    entry: String,
    chains: HashMap<String, Chain>,
}

impl RuleFilter {
    /// Build a filter whose entry point is `entry`, validating that every
    /// chain named by a `call`/`goto` (including `entry` itself) actually
    /// exists, and that the `call`/`goto` graph contains no cycle, up front
    /// so a typo or a chain loop is reported at load time rather than the
    /// first time a matching packet arrives.
    pub fn from_config(config: &ConfigFile, entry: &str) -> Result<RuleFilter, RouterError> {
        let chains: HashMap<String, Chain> = config
            .chains
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();

        if !chains.contains_key(entry) {
            return Err(RouterError::ConfigInvalid(format!(
                "filter entry chain {:?} is not defined",
                entry
            )));
        }
        for chain in chains.values() {
            for rule in &chain.rules {
                let target = match &rule.action {
                    Action::Call(name) | Action::Goto(name) => Some(name),
                    _ => None,
                };
                if let Some(target) = target {
                    if !chains.contains_key(target) {
                        return Err(RouterError::ConfigInvalid(format!(
                            "chain {:?} references undefined chain {:?}",
                            chain.name, target
                        )));
                    }
                }
            }
        }

        Self::check_for_cycles(&chains)?;

        Ok(RuleFilter {
            entry: entry.to_string(),
            chains,
        })
    }

    /// Reject a `call`/`goto` graph that contains a cycle: a chain that can
    /// reach itself again without ever reaching a rule-free end (which would
    /// fall through to a `default_action` verdict) would evaluate forever
    /// for any packet that matches every rule along the cycle.
    fn check_for_cycles(chains: &HashMap<String, Chain>) -> Result<(), RouterError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            name: &'a str,
            chains: &'a HashMap<String, Chain>,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Result<(), RouterError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    path.push(name);
                    return Err(RouterError::ConfigInvalid(format!(
                        "chain call/goto cycle detected: {}",
                        path.join(" -> ")
                    )));
                }
                None => {}
            }
            marks.insert(name, Mark::Visiting);
            path.push(name);
            let chain = &chains[name];
            for rule in &chain.rules {
                let target = match &rule.action {
                    Action::Call(target) | Action::Goto(target) => Some(target.as_str()),
                    _ => None,
                };
                if let Some(target) = target {
                    visit(target, chains, marks, path)?;
                }
            }
            path.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        for name in chains.keys() {
            let mut path = Vec::new();
            visit(name, chains, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn rule_matches(condition: &Condition, packet: &Packet, dest: MavAddress) -> bool {
        match condition {
            Condition::From(subnet) => subnet.contains(packet.source()),
            Condition::To(subnet) => subnet.contains(dest),
            Condition::Type(name) => packet.name().eq_ignore_ascii_case(name),
        }
    }
}

impl Filter for RuleFilter {
    fn will_accept(&self, packet: &Packet, dest: MavAddress) -> (bool, i16) {
        let mut stack: Vec<(String, usize)> = Vec::new();
        let mut current = self.entry.clone();
        let mut idx = 0usize;
        let mut jumps = 0usize;

        loop {
            // Validated at construction time; every reachable chain name
            // exists.
            let chain = &self.chains[&current];

            if idx >= chain.rules.len() {
                match stack.pop() {
                    Some((ret_chain, ret_idx)) => {
                        current = ret_chain;
                        idx = ret_idx;
                        continue;
                    }
                    None => return (chain.default_action == DefaultAction::Accept, 0),
                }
            }

            let rule = &chain.rules[idx];
            let matched = rule
                .conditions
                .iter()
                .all(|c| Self::rule_matches(c, packet, dest));
            if !matched {
                idx += 1;
                continue;
            }

            jumps += 1;
            if jumps > MAX_JUMPS {
                // A misconfigured cycle; fail closed.
                return (false, 0);
            }

            match &rule.action {
                Action::Accept(priority) => return (true, priority.unwrap_or(0)),
                Action::Reject => return (false, 0),
                Action::Call(target) => {
                    stack.push((current, idx + 1));
                    current = target.clone();
                    idx = 0;
                }
                Action::Goto(target) => {
                    current = target.clone();
                    idx = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MavAddress;
    use crate::config::parse;
    use crate::packet::MavlinkVersion;

    fn packet(source: &str, dest: Option<&str>, name: &'static str) -> Packet {
        let source: MavAddress = source.parse().unwrap();
        let dest = dest.map(|d| d.parse().unwrap());
        Packet::new(vec![], MavlinkVersion::V1, 0, name, source, dest)
    }

    fn accepts(filter: &RuleFilter, packet: &Packet, dest: &str) -> bool {
        filter.will_accept(packet, dest.parse().unwrap()).0
    }

    #[test]
    fn simple_accept_rule() {
        let config = parse("chain main reject {\n  accept from 1.1;\n}\n").unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        assert!(accepts(&filter, &packet("1.1", None, "HEARTBEAT"), "9.9"));
        assert!(!accepts(&filter, &packet("2.2", None, "HEARTBEAT"), "9.9"));
    }

    #[test]
    fn priority_defaults_to_zero_and_is_settable() {
        let config =
            parse("chain main reject {\n  accept priority 3 from 1.1;\n  accept;\n}\n").unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        assert_eq!(
            filter.will_accept(&packet("1.1", None, "HEARTBEAT"), "9.9".parse().unwrap()),
            (true, 3)
        );
        assert_eq!(
            filter.will_accept(&packet("2.2", None, "HEARTBEAT"), "9.9".parse().unwrap()),
            (true, 0)
        );
    }

    #[test]
    fn to_condition_matches_the_candidate_destination_not_the_packet_dest() {
        // The packet itself has no destination (a broadcast); the filter is
        // still evaluated per-candidate, so `to` conditions match `dest`.
        let config = parse("chain main reject {\n  accept to 9.9;\n}\n").unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        let p = packet("1.1", None, "HEARTBEAT");
        assert!(accepts(&filter, &p, "9.9"));
        assert!(!accepts(&filter, &p, "9.1"));
    }

    #[test]
    fn default_action_applies_when_nothing_matches() {
        let config = parse("chain main accept {\n  reject from 9.9;\n}\n").unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        assert!(accepts(&filter, &packet("1.1", None, "HEARTBEAT"), "2.2"));
    }

    #[test]
    fn call_falls_through_when_sub_chain_exhausts() {
        let src = r#"
            chain main reject {
                call common from 1.1;
                accept;
            }
            chain common reject {
                reject from 9.9;
            }
        "#;
        let config = parse(src).unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        // `common` doesn't match 1.1 against 9.9, falls off its end, and
        // since `common`'s own default is `reject` but `main` called it (not
        // goto'd), control returns to the rule after the call.
        assert!(accepts(&filter, &packet("1.1", None, "HEARTBEAT"), "9.9"));
    }

    #[test]
    fn call_terminates_immediately_on_sub_chain_verdict() {
        let src = r#"
            chain main reject {
                call common from 1.1;
                accept;
            }
            chain common reject {
                reject from 1.1;
            }
        "#;
        let config = parse(src).unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        assert!(!accepts(&filter, &packet("1.1", None, "HEARTBEAT"), "9.9"));
    }

    #[test]
    fn goto_does_not_return_to_caller() {
        let src = r#"
            chain main reject {
                goto common from 1.1;
                accept;
            }
            chain common accept {
            }
        "#;
        let config = parse(src).unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        // `common`'s own default (accept) decides it; the `accept;` rule
        // after the goto in `main` is unreachable.
        assert!(accepts(&filter, &packet("1.1", None, "HEARTBEAT"), "9.9"));
    }

    #[test]
    fn goto_falls_through_to_enclosing_call_frame() {
        let src = r#"
            chain main reject {
                call middle from 1.1;
                accept;
            }
            chain middle reject {
                goto inner;
            }
            chain inner reject {
                reject from 9.9;
            }
        "#;
        let config = parse(src).unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        // `inner` doesn't match and falls off; since the goto pushed no
        // frame, control returns to `main`'s call frame, not `middle`'s
        // default action.
        assert!(accepts(&filter, &packet("1.1", None, "HEARTBEAT"), "9.9"));
    }

    #[test]
    fn type_condition_matches_packet_name() {
        let config = parse("chain main accept {\n  reject type HEARTBEAT;\n}\n").unwrap();
        let filter = RuleFilter::from_config(&config, "main").unwrap();
        assert!(!accepts(&filter, &packet("1.1", None, "HEARTBEAT"), "9.9"));
        assert!(accepts(&filter, &packet("1.1", None, "PING"), "9.9"));
    }

    #[test]
    fn rejects_reference_to_undefined_chain() {
        let config = parse("chain main reject {\n  call missing;\n}\n").unwrap();
        assert!(RuleFilter::from_config(&config, "main").is_err());
    }

    #[test]
    fn rejects_undefined_entry_chain() {
        let config = parse("chain main reject {\n}\n").unwrap();
        assert!(RuleFilter::from_config(&config, "nope").is_err());
    }

    #[test]
    fn rejects_a_direct_self_call_cycle() {
        let config = parse("chain main reject {\n  call main;\n}\n").unwrap();
        assert!(RuleFilter::from_config(&config, "main").is_err());
    }

    #[test]
    fn rejects_an_indirect_goto_cycle() {
        let src = r#"
            chain main reject {
                goto middle;
            }
            chain middle reject {
                goto main;
            }
        "#;
        let config = parse(src).unwrap();
        assert!(RuleFilter::from_config(&config, "main").is_err());
    }

    #[test]
    fn accepts_a_chain_called_from_two_places_without_a_cycle() {
        // Not a cycle: `common` is reachable via two different paths, but
        // never reaches itself again.
        let src = r#"
            chain main reject {
                call common from 1.1;
                call common from 2.2;
            }
            chain common reject {
                accept;
            }
        "#;
        let config = parse(src).unwrap();
        assert!(RuleFilter::from_config(&config, "main").is_ok());
    }
}
