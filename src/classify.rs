//! Window classification: project-scoped or always visible.
//!
//! Rules are evaluated by linear scan in descending priority; the first
//! match wins and a window that matches nothing is [`Scope::Global`], so an
//! unknown application is never hidden by accident.

use crate::config::RuleConfig;
use crate::project::Project;
use serde::{Deserialize, Serialize};

/// Priority of the built-in rules.
pub const SYSTEM_RULE_PRIORITY: i32 = 10;
/// Priority of rules derived from project `scoped_classes`.
pub const PROJECT_RULE_PRIORITY: i32 = 50;
/// Default priority of rules from the config file.
pub const USER_RULE_PRIORITY: i32 = 100;

/// Visibility scope of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible only while its owning project is active.
    Scoped,
    /// Visible regardless of the active project.
    Global,
}

/// Where a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    System,
    Project,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: String,
    pub priority: i32,
    pub scope: Scope,
    pub source: RuleSource,
}

impl Rule {
    pub fn new(pattern: impl Into<String>, priority: i32, scope: Scope, source: RuleSource) -> Self {
        Self {
            pattern: pattern.into(),
            priority,
            scope,
            source,
        }
    }

    /// Whether the rule matches a window's class or instance.
    pub fn matches(&self, class: &str, instance: &str) -> bool {
        glob_match(&self.pattern, class) || (!instance.is_empty() && glob_match(&self.pattern, instance))
    }
}

/// Result of [`Classifier::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub scope: Scope,
    /// `None` when no rule matched and the global default applied.
    pub matched_rule: Option<Rule>,
}

/// An ordered rule set.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Build a classifier.  Rules are ordered by descending priority; rules
    /// of equal priority keep the order they were given in.
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    /// System rules, one rule per scoped class of every project, and the
    /// user's rules.
    pub fn from_sources<'a>(
        user_rules: &[RuleConfig],
        projects: impl IntoIterator<Item = &'a Project>,
    ) -> Self {
        let mut rules = system_rules();
        for project in projects {
            for class in &project.scoped_classes {
                rules.push(Rule::new(
                    class.clone(),
                    PROJECT_RULE_PRIORITY,
                    Scope::Scoped,
                    RuleSource::Project,
                ));
            }
        }
        for user in user_rules {
            rules.push(Rule::new(
                user.pattern.clone(),
                user.priority.unwrap_or(USER_RULE_PRIORITY),
                user.scope,
                RuleSource::User,
            ));
        }
        Self::new(rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn classify(&self, class: &str, instance: &str) -> Classification {
        match self.rules.iter().find(|r| r.matches(class, instance)) {
            Some(rule) => Classification {
                scope: rule.scope,
                matched_rule: Some(rule.clone()),
            },
            None => Classification {
                scope: Scope::Global,
                matched_rule: None,
            },
        }
    }

    /// Shorthand for `classify(..).scope == Scope::Scoped`.
    pub fn is_scoped(&self, class: &str, instance: &str) -> bool {
        self.classify(class, instance).scope == Scope::Scoped
    }
}

/// Built-in rules: editors and terminals follow the project, browsers and
/// system utilities stay visible.
pub fn system_rules() -> Vec<Rule> {
    let scoped = ["code", "code-oss", "codium", "ghostty", "alacritty", "kitty", "foot", "org.wezfurlong.wezterm"];
    let global = ["firefox", "chromium", "*pavucontrol*", "*blueman*"];
    scoped
        .iter()
        .map(|p| Rule::new(*p, SYSTEM_RULE_PRIORITY, Scope::Scoped, RuleSource::System))
        .chain(
            global
                .iter()
                .map(|p| Rule::new(*p, SYSTEM_RULE_PRIORITY, Scope::Global, RuleSource::System)),
        )
        .collect()
}

/// Case-insensitive glob match where `*` matches any run of characters.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = t;
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some(s) = star {
            // Let the last star swallow one more character and retry.
            p = s + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn glob_basics() {
        assert!(glob_match("firefox", "Firefox"));
        assert!(glob_match("*pavucontrol*", "org.pulseaudio.pavucontrol"));
        assert!(glob_match("org.*.term", "org.foo.term"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("code", "code-oss"));
        assert!(!glob_match("a*b", "ac"));
        assert!(glob_match("a*b*c", "axxbyyc"));
    }

    #[test]
    fn no_match_defaults_to_global() {
        let c = Classifier::new(vec![]);
        let result = c.classify("Unknown", "unknown");
        assert_eq!(result.scope, Scope::Global);
        assert!(result.matched_rule.is_none());
    }

    #[test]
    fn higher_priority_wins() {
        let c = Classifier::new(vec![
            Rule::new("foot", 10, Scope::Scoped, RuleSource::System),
            Rule::new("foot", 100, Scope::Global, RuleSource::User),
        ]);
        let result = c.classify("foot", "foot");
        assert_eq!(result.scope, Scope::Global);
        assert_eq!(result.matched_rule.unwrap().source, RuleSource::User);
    }

    #[test]
    fn equal_priority_keeps_declaration_order() {
        let c = Classifier::new(vec![
            Rule::new("f*", 10, Scope::Global, RuleSource::System),
            Rule::new("foot", 10, Scope::Scoped, RuleSource::System),
        ]);
        assert_eq!(c.classify("foot", "").scope, Scope::Global);
    }

    #[test]
    fn instance_is_matched_too() {
        let c = Classifier::new(vec![Rule::new("scratchterm", 10, Scope::Scoped, RuleSource::User)]);
        assert!(c.is_scoped("Alacritty", "scratchterm"));
        assert!(!c.is_scoped("Alacritty", ""));
    }

    #[test]
    fn user_rules_override_system_rules() {
        let user = vec![RuleConfig {
            pattern: "code".into(),
            scope: Scope::Global,
            priority: None,
        }];
        let c = Classifier::from_sources(&user, std::iter::empty());
        assert_eq!(c.classify("code", "code").scope, Scope::Global);
        // Untouched system rule still applies.
        assert_eq!(c.classify("kitty", "kitty").scope, Scope::Scoped);
    }

    #[test]
    fn project_classes_become_scoped_rules() {
        let project = Project {
            scoped_classes: BTreeSet::from(["Emacs".to_string()]),
            ..Project::new("alpha", "/home/u/alpha")
        };
        let c = Classifier::from_sources(&[], [&project]);
        let result = c.classify("emacs", "");
        assert_eq!(result.scope, Scope::Scoped);
        assert_eq!(result.matched_rule.unwrap().source, RuleSource::Project);
    }

    #[test]
    fn low_priority_user_rule_loses_to_project_rule() {
        let project = Project {
            scoped_classes: BTreeSet::from(["Emacs".to_string()]),
            ..Project::new("alpha", "/home/u/alpha")
        };
        let user = vec![RuleConfig {
            pattern: "emacs".into(),
            scope: Scope::Global,
            priority: Some(1),
        }];
        let c = Classifier::from_sources(&user, [&project]);
        assert_eq!(c.classify("Emacs", "").scope, Scope::Scoped);
    }
}
