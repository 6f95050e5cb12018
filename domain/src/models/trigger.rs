use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// One entry of an `on` list: an event name (`push`, `manual`), a branch name,
/// a full ref (`refs/heads/<branch>`) or `*`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(transparent)]
pub struct TriggerRule(pub String);

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Trigger {
    pub repository: RepositoryRef,
    pub pusher_id: i64,
    pub event: TriggerEvent,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RepositoryRef {
    pub id: i64,
    pub owner: String,
    pub name: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    Push { branch: Branch },
    Manual { branch: Branch },
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub commit: String,
}

impl TriggerRule {
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        let rule = self.0.trim();
        let branch = event.branch();

        rule == "*"
            || rule == event.name()
            || rule == branch.name
            || rule
                .strip_prefix("refs/heads/")
                .is_some_and(|name| name == branch.name)
    }
}

/// `None` means the list was omitted and every event matches.
pub fn matches_any(rules: Option<&[TriggerRule]>, event: &TriggerEvent) -> bool {
    match rules {
        None => true,
        Some(rules) => rules.iter().any(|rule| rule.matches(event)),
    }
}

impl TriggerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::Manual { .. } => "manual",
        }
    }

    pub fn branch(&self) -> &Branch {
        match self {
            TriggerEvent::Push { branch } | TriggerEvent::Manual { branch } => branch,
        }
    }

    pub fn from_parts(name: &str, branch: Branch) -> Option<Self> {
        match name {
            "push" => Some(TriggerEvent::Push { branch }),
            "manual" => Some(TriggerEvent::Manual { branch }),
            _ => None,
        }
    }
}

impl Display for TriggerRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(branch: &str) -> TriggerEvent {
        TriggerEvent::Push {
            branch: Branch {
                name: branch.to_owned(),
                commit: "abcdef123456".to_owned(),
            },
        }
    }

    #[test]
    fn event_rule_should_match_any_branch() {
        let rule = TriggerRule("push".to_owned());

        assert!(rule.matches(&push("main")));
        assert!(rule.matches(&push("feature/x")));
    }

    #[test]
    fn event_rule_should_not_match_other_event() {
        let rule = TriggerRule("manual".to_owned());

        assert!(!rule.matches(&push("main")));
    }

    #[test]
    fn branch_rule_should_match_branch_name_and_full_ref() {
        assert!(TriggerRule("main".to_owned()).matches(&push("main")));
        assert!(TriggerRule("refs/heads/main".to_owned()).matches(&push("main")));
        assert!(!TriggerRule("main".to_owned()).matches(&push("dev")));
    }

    #[test]
    fn wildcard_rule_should_match_everything() {
        assert!(TriggerRule("*".to_owned()).matches(&push("dev")));
    }

    #[test]
    fn omitted_rules_should_match() {
        assert!(matches_any(None, &push("dev")));
        assert!(!matches_any(Some(&[]), &push("dev")));
    }

    #[test]
    fn deserialize_rule_list() {
        let rules: Vec<TriggerRule> = serde_json::from_str(r#"["push", "main"]"#).unwrap();

        assert_eq!(
            rules,
            vec![TriggerRule("push".to_owned()), TriggerRule("main".to_owned())]
        );
    }
}
