//! Evaluates a feed entry against one tenant's rule set.
//!
//! The composed condition for a rule is:
//! `NOT global-exclude AND word AND NOT rule-exclude AND (rule-include OR no includes)`.
//! Every term is tested with the same containment check, chosen by the
//! tenant's full-word and regex settings.
//! Rules are tried in insertion order and the first satisfied rule wins.

use tracing::trace;

use crate::feed::Entry;
use crate::rules::ruleset::{KeywordRule, RuleSet, Settings};

/// A successful match: the rule and the include term that satisfied it, if any.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    pub rule: &'a KeywordRule,
    pub matched_include: Option<&'a str>,
}

/// Lowercased text the rules run against: title, plus summary when enabled.
pub fn searchable_text(entry: &Entry, settings: &Settings) -> String {
    let mut text = entry.title.to_lowercase();
    if settings.match_summary && !entry.summary.is_empty() {
        text.push(' ');
        text.push_str(&entry.summary.to_lowercase());
    }
    text
}

/// Evaluate `entry` against `rules`. Pure; no side effects besides trace logs.
pub fn evaluate<'a>(entry: &Entry, rules: &'a RuleSet) -> Option<RuleMatch<'a>> {
    let settings = rules.settings();
    let text = searchable_text(entry, settings);
    let full_word = settings.full_word_match;

    // Global exclusion has absolute priority.
    if let Some(blocked) = rules
        .global_exclude()
        .iter()
        .find(|t| t.occurs_in(&text, full_word))
    {
        trace!(entry = %entry.id, term = %blocked.text(), "Entry globally excluded");
        return None;
    }

    rules.rules().find_map(|rule| match_rule(rule, &text, settings))
}

fn match_rule<'a>(rule: &'a KeywordRule, text: &str, settings: &Settings) -> Option<RuleMatch<'a>> {
    let full_word = settings.full_word_match;
    let word = rule.word_term();
    if !word.is_active() || !word.occurs_in(text, full_word) {
        return None;
    }

    if rule.exclude_terms().iter().any(|t| t.occurs_in(text, full_word)) {
        return None;
    }

    if rule.include_terms().is_empty() {
        return Some(RuleMatch {
            rule,
            matched_include: None,
        });
    }

    rule.include_terms()
        .iter()
        .find(|t| t.occurs_in(text, full_word))
        .map(|t| RuleMatch {
            rule,
            matched_include: Some(t.text()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ruleset::{ResetMode, Setting};

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn mk_rules() -> RuleSet {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("mk", &s(&["出", "卖"]), &s(&["吗", "求"]), ResetMode::None)
            .unwrap();
        rs
    }

    fn entry(title: &str) -> Entry {
        Entry::new("1", title)
    }

    #[test]
    fn include_term_satisfies_rule() {
        let rs = mk_rules();
        let m = evaluate(&entry("出了个mk"), &rs).unwrap();
        assert_eq!(m.rule.word(), "mk");
        assert_eq!(m.matched_include, Some("出"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let rs = mk_rules();
        assert!(evaluate(&entry("求个mk"), &rs).is_none());
        assert!(evaluate(&entry("出mk吗"), &rs).is_none());
    }

    #[test]
    fn missing_include_rejects() {
        let rs = mk_rules();
        assert!(evaluate(&entry("mk 绑定"), &rs).is_none());
    }

    #[test]
    fn no_include_constraint_needs_only_word() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("vps", &[], &[], ResetMode::None).unwrap();
        let m = evaluate(&entry("Cheap VPS deal"), &rs).unwrap();
        assert!(m.matched_include.is_none());
    }

    #[test]
    fn global_exclude_overrides_rules() {
        let mut rs = mk_rules();
        rs.block_global("骗子");
        assert!(evaluate(&entry("出mk 骗子"), &rs).is_none());
        assert!(evaluate(&entry("出mk"), &rs).is_some());
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("mk", &[], &[], ResetMode::None).unwrap();
        rs.add_or_merge_rule("出", &[], &[], ResetMode::None).unwrap();
        assert_eq!(evaluate(&entry("出mk"), &rs).unwrap().rule.word(), "mk");

        rs.delete_rule("mk");
        rs.add_or_merge_rule("mk", &[], &[], ResetMode::None).unwrap();
        assert_eq!(evaluate(&entry("出mk"), &rs).unwrap().rule.word(), "出");
    }

    #[test]
    fn later_rule_tried_when_earlier_rejected() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("mk", &[], &s(&["求"]), ResetMode::None).unwrap();
        rs.add_or_merge_rule("vps", &[], &[], ResetMode::None).unwrap();
        assert_eq!(evaluate(&entry("求 mk vps"), &rs).unwrap().rule.word(), "vps");
    }

    #[test]
    fn summary_is_searched_only_when_enabled() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("mk", &[], &[], ResetMode::None).unwrap();
        let e = Entry::new("1", "title only").with_summary("selling mk");
        assert!(evaluate(&e, &rs).is_some());
        rs.set_setting(Setting::MatchSummary(false)).unwrap();
        assert!(evaluate(&e, &rs).is_none());
    }

    #[test]
    fn full_word_setting_applies_to_rule_word() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("mk", &[], &[], ResetMode::None).unwrap();
        rs.set_setting(Setting::FullWordMatch(true)).unwrap();
        assert!(evaluate(&entry("selling mks"), &rs).is_none());
        assert!(evaluate(&entry("卖mk了"), &rs).is_some());
    }

    #[test]
    fn full_word_setting_applies_to_include_terms() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("mk", &s(&["sell"]), &[], ResetMode::None).unwrap();
        rs.set_setting(Setting::FullWordMatch(true)).unwrap();
        assert!(evaluate(&entry("selling mk"), &rs).is_none());
        assert_eq!(evaluate(&entry("sell mk"), &rs).unwrap().matched_include, Some("sell"));
    }

    #[test]
    fn full_word_setting_applies_to_exclude_terms() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("mk", &[], &s(&["ab"]), ResetMode::None).unwrap();
        rs.set_setting(Setting::FullWordMatch(true)).unwrap();
        assert!(evaluate(&entry("mk abc"), &rs).is_some());
        assert!(evaluate(&entry("mk ab"), &rs).is_none());
    }

    #[test]
    fn full_word_setting_applies_to_global_block() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("mk", &[], &[], ResetMode::None).unwrap();
        rs.block_global("ad");
        rs.set_setting(Setting::FullWordMatch(true)).unwrap();
        assert!(evaluate(&entry("mk address"), &rs).is_some());
        assert!(evaluate(&entry("mk ad"), &rs).is_none());
    }

    #[test]
    fn regex_mode_matches_patterns() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule(r"m\d{2}", &[], &[], ResetMode::None).unwrap();
        rs.set_setting(Setting::RegexMatch(true)).unwrap();
        assert!(evaluate(&entry("selling M12"), &rs).is_some());
        assert!(evaluate(&entry("selling m1"), &rs).is_none());
    }

    #[test]
    fn invalid_regex_rule_is_skipped_not_fatal() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("(mk", &[], &[], ResetMode::None).unwrap();
        rs.add_or_merge_rule("vps", &[], &[], ResetMode::None).unwrap();
        rs.set_setting(Setting::RegexMatch(true)).unwrap();
        assert!(evaluate(&entry("(mk"), &rs).is_none());
        assert_eq!(evaluate(&entry("(mk vps"), &rs).unwrap().rule.word(), "vps");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let mut rs = RuleSet::new();
        rs.add_or_merge_rule("MK", &s(&["Sell"]), &[], ResetMode::None).unwrap();
        assert!(evaluate(&entry("will SELL mk"), &rs).is_some());
    }

    #[test]
    fn empty_rule_set_matches_nothing() {
        let rs = RuleSet::new();
        assert!(evaluate(&entry("anything"), &rs).is_none());
    }
}
