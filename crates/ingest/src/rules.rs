use regex::Regex;
use thiserror::Error;

use acfr_core::FundRule;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid fund rule pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

struct CompiledRule {
    rule: FundRule,
    regex: Regex,
}

/// Ordered fund-detection rules with precompiled patterns. Detection is
/// a pure function of (account code, rule list): the first enabled rule
/// whose pattern matches and whose capture group is non-empty wins.
pub struct FundRuleSet {
    rules: Vec<CompiledRule>,
}

impl FundRuleSet {
    /// Compiles rules in their given (creation) order.
    pub fn compile(rules: Vec<FundRule>) -> Result<Self, RuleError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let regex =
                    Regex::new(&rule.pattern).map_err(|source| RuleError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })?;
                Ok(CompiledRule { rule, regex })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;
        Ok(FundRuleSet { rules })
    }

    /// Fund code for an account, or `None` when no rule qualifies.
    /// Capture group numbering follows the regex crate: 0 is the whole
    /// match, 1 the first parenthesized group.
    pub fn detect(&self, account: &str) -> Option<String> {
        for cr in &self.rules {
            if !cr.rule.enabled {
                continue;
            }
            let Some(caps) = cr.regex.captures(account) else {
                continue;
            };
            if let Some(m) = caps.get(cr.rule.capture_group) {
                if !m.as_str().is_empty() {
                    return Some(m.as_str().to_string());
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, capture_group: usize, enabled: bool) -> FundRule {
        FundRule {
            id: None,
            name: "test".to_string(),
            pattern: pattern.to_string(),
            capture_group,
            enabled,
        }
    }

    #[test]
    fn first_matching_enabled_rule_wins() {
        let set = FundRuleSet::compile(vec![
            rule(r"^(\d{2})-", 1, true),
            rule(r"^(\d{3})", 1, true),
        ])
        .unwrap();
        assert_eq!(set.detect("10-1000").as_deref(), Some("10"));
    }

    #[test]
    fn prefix_capture_scenario() {
        let set = FundRuleSet::compile(vec![rule(r"^(\d{2})-", 1, true)]).unwrap();
        assert_eq!(set.detect("10-1000").as_deref(), Some("10"));
        assert_eq!(set.detect("ABC"), None);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let set = FundRuleSet::compile(vec![
            rule(r"^(\d{2})-", 1, false),
            rule(r"^(\d)", 1, true),
        ])
        .unwrap();
        assert_eq!(set.detect("10-1000").as_deref(), Some("1"));
    }

    #[test]
    fn disabling_the_winner_without_another_match_yields_none() {
        let set = FundRuleSet::compile(vec![rule(r"^(\d{2})-", 1, false)]).unwrap();
        assert_eq!(set.detect("10-1000"), None);
    }

    #[test]
    fn empty_capture_does_not_win() {
        // Group 1 can match the empty string; a later rule should take over.
        let set = FundRuleSet::compile(vec![
            rule(r"^(\d*)X", 1, true),
            rule(r"^([A-Z]+)", 1, true),
        ])
        .unwrap();
        assert_eq!(set.detect("XRAY").as_deref(), Some("XRAY"));
    }

    #[test]
    fn missing_capture_group_does_not_win() {
        let set = FundRuleSet::compile(vec![rule(r"^\d{2}-", 3, true)]).unwrap();
        assert_eq!(set.detect("10-1000"), None);
    }

    #[test]
    fn group_zero_is_the_whole_match() {
        let set = FundRuleSet::compile(vec![rule(r"^\d{2}", 0, true)]).unwrap();
        assert_eq!(set.detect("10-1000").as_deref(), Some("10"));
    }

    #[test]
    fn detection_is_deterministic() {
        let set = FundRuleSet::compile(vec![rule(r"^(\d{2})-", 1, true)]).unwrap();
        let a = set.detect("10-1000");
        let b = set.detect("10-1000");
        assert_eq!(a, b);
    }

    #[test]
    fn bad_pattern_is_rejected_at_compile() {
        assert!(matches!(
            FundRuleSet::compile(vec![rule(r"(\d{2}-", 1, true)]),
            Err(RuleError::InvalidPattern { .. })
        ));
    }
}
