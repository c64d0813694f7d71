// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Named sub-predicates.
//!
//! Every eligibility rule in the planner is an ordered list of named
//! conditions. [`Eligibility`] records each one so that a decision can be
//! logged and asserted on condition by condition.

use std::fmt;

use tracing::trace;

/// How the recorded conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Combine {
    /// Every condition must hold; evaluation stops at the first failure.
    All,
    /// One condition is enough; evaluation stops at the first success.
    Any,
}

/// Outcome of a single named condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Outcome {
    Passed,
    Failed,
    /// Not evaluated because the result was already decided.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Check {
    pub name: &'static str,
    pub outcome: Outcome,
}

/// An ordered list of named conditions and their outcomes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Eligibility {
    rule: &'static str,
    combine: Combine,
    checks: Vec<Check>,
}

impl Eligibility {
    /// Conditions joined with logical AND.
    pub fn all(rule: &'static str) -> Self {
        Self {
            rule,
            combine: Combine::All,
            checks: Vec::new(),
        }
    }

    /// Conditions joined with logical OR.
    pub fn any(rule: &'static str) -> Self {
        Self {
            rule,
            combine: Combine::Any,
            checks: Vec::new(),
        }
    }

    fn decided(&self) -> bool {
        match self.combine {
            Combine::All => self.checks.iter().any(|c| c.outcome == Outcome::Failed),
            Combine::Any => self.checks.iter().any(|c| c.outcome == Outcome::Passed),
        }
    }

    /// Records a condition whose value is already known.
    pub fn check(self, name: &'static str, passed: bool) -> Self {
        self.check_with(name, || passed)
    }

    /// Records a condition, evaluating it only if the result is still open.
    pub fn check_with(mut self, name: &'static str, f: impl FnOnce() -> bool) -> Self {
        let outcome = if self.decided() {
            Outcome::Skipped
        } else if f() {
            Outcome::Passed
        } else {
            Outcome::Failed
        };
        trace!("{}: {name} -> {outcome:?}", self.rule);
        self.checks.push(Check { name, outcome });
        self
    }

    /// Appends the conditions of a nested rule as one condition.
    pub fn nest(self, name: &'static str, inner: &Eligibility) -> Self {
        self.check(name, inner.holds())
    }

    /// Final value of the rule.
    pub fn holds(&self) -> bool {
        match self.combine {
            Combine::All => self.checks.iter().all(|c| c.outcome != Outcome::Failed),
            Combine::Any => self.checks.iter().any(|c| c.outcome == Outcome::Passed),
        }
    }

    pub fn rule(&self) -> &'static str {
        self.rule
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Name of the first failed condition of an AND rule.
    pub fn first_failure(&self) -> Option<&'static str> {
        self.checks
            .iter()
            .find(|c| c.outcome == Outcome::Failed)
            .map(|c| c.name)
    }

    /// Name of the first passed condition of an OR rule.
    pub fn first_success(&self) -> Option<&'static str> {
        self.checks
            .iter()
            .find(|c| c.outcome == Outcome::Passed)
            .map(|c| c.name)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.holds() { "yes" } else { "no" };
        match (self.combine, self.first_failure(), self.first_success()) {
            (Combine::All, Some(failed), _) => write!(f, "{}={verdict} (failed: {failed})", self.rule),
            (Combine::Any, _, Some(hit)) => write!(f, "{}={verdict} (via {hit})", self.rule),
            _ => write!(f, "{}={verdict}", self.rule),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_stops_at_first_failure() {
        let mut evaluated = false;
        let e = Eligibility::all("demo")
            .check("first", true)
            .check("second", false)
            .check_with("third", || {
                evaluated = true;
                true
            });
        assert!(!e.holds());
        assert!(!evaluated);
        assert_eq!(e.first_failure(), Some("second"));
        assert_eq!(e.checks()[2].outcome, Outcome::Skipped);
        assert_eq!(e.to_string(), "demo=no (failed: second)");
    }

    #[test]
    fn test_any_stops_at_first_success() {
        let e = Eligibility::any("scenario")
            .check("a", false)
            .check("b", true)
            .check("c", true);
        assert!(e.holds());
        assert_eq!(e.first_success(), Some("b"));
        assert_eq!(e.checks()[2].outcome, Outcome::Skipped);
    }

    #[test]
    fn test_empty_rules() {
        assert!(Eligibility::all("vacuous").holds());
        assert!(!Eligibility::any("nothing").holds());
    }

    #[test]
    fn test_nest() {
        let inner = Eligibility::all("inner").check("x", false);
        let outer = Eligibility::any("outer").nest("inner", &inner).check("y", true);
        assert!(outer.holds());
        assert_eq!(outer.checks()[0].outcome, Outcome::Failed);
    }
}
