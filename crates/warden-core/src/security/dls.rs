//! Document-level security query rewriting.
//!
//! The caller's query is wrapped before it reaches the search engine:
//!
//! ```text
//! {"bool": {"must": [original],
//!           "filter": [{"bool": {"should": [f1, f2, ...], "minimum_should_match": 1}}]}}
//! ```
//!
//! Filtering happens inside the engine so hit counts and aggregations only
//! ever see visible documents.

use serde_json::{json, Value};

use super::evaluator::{AuthorizationDecision, DlsDirective};

fn match_all() -> Value {
    json!({"match_all": {}})
}

fn any_of(directive: &DlsDirective) -> Value {
    let should: Vec<Value> = directive
        .fragments()
        .iter()
        .map(|f| f.query.clone())
        .collect();
    json!({"bool": {"should": should, "minimum_should_match": 1}})
}

/// Wrap `original` with one index's DLS restriction.
///
/// An unrestricted directive returns the original query (or `match_all`).
pub fn rewrite_query(original: Option<&Value>, directive: &DlsDirective) -> Value {
    let original = original.cloned().unwrap_or_else(match_all);
    if !directive.is_restricted() {
        return original;
    }
    json!({"bool": {"must": [original], "filter": [any_of(directive)]}})
}

/// Rewrite a query that targets every index in `decision`.
///
/// When all targets share one directive the plain form is used. Otherwise each
/// index gets its own clause scoped by `_index`, so one index's restriction
/// never leaks onto another.
pub fn rewrite_for_decision(original: Option<&Value>, decision: &AuthorizationDecision) -> Value {
    let directives: Vec<(&String, &DlsDirective)> = decision
        .index_directives()
        .iter()
        .map(|(index, d)| (index, &d.dls))
        .collect();

    let Some((_, first)) = directives.first() else {
        return original.cloned().unwrap_or_else(match_all);
    };
    if directives.iter().all(|(_, d)| d == first) {
        return rewrite_query(original, first);
    }

    let per_index: Vec<Value> = directives
        .iter()
        .map(|(index, directive)| {
            let scope = json!({"term": {"_index": index}});
            if directive.is_restricted() {
                json!({"bool": {"filter": [scope, any_of(directive)]}})
            } else {
                scope
            }
        })
        .collect();

    let original = original.cloned().unwrap_or_else(match_all);
    json!({"bool": {
        "must": [original],
        "filter": [{"bool": {"should": per_index, "minimum_should_match": 1}}]
    }})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::evaluator::DlsFragment;

    fn fragment(role: &str, genre: &str) -> DlsFragment {
        DlsFragment {
            role: role.to_string(),
            query: json!({"term": {"genre": genre}}),
        }
    }

    #[test]
    fn test_unrestricted_leaves_query() {
        let original = json!({"match": {"title": "blue"}});
        assert_eq!(rewrite_query(Some(&original), &DlsDirective::Unrestricted), original);
        assert_eq!(rewrite_query(None, &DlsDirective::Unrestricted), json!({"match_all": {}}));
    }

    #[test]
    fn test_fragments_are_or_combined() {
        let directive = DlsDirective::Restricted(vec![fragment("jazz", "jazz"), fragment("rock", "rock")]);
        let original = json!({"match": {"title": "blue"}});

        assert_eq!(
            rewrite_query(Some(&original), &directive),
            json!({"bool": {
                "must": [{"match": {"title": "blue"}}],
                "filter": [{"bool": {
                    "should": [{"term": {"genre": "jazz"}}, {"term": {"genre": "rock"}}],
                    "minimum_should_match": 1
                }}]
            }})
        );
    }

    mod per_index {
        use super::*;
        use crate::security::evaluator::PrivilegeEvaluator;
        use crate::security::registry::{RoleRegistry, SecuritySnapshot};
        use std::sync::Arc;
        use warden_proto::{ConfigType, Principal};

        const ROLES: &str = r#"{
            "rock_songs": {"index_permissions": [{"index_patterns": ["songs"],
                "allowed_actions": ["indices:data/read/*"], "dls": "{\"term\":{\"genre\":\"rock\"}}"}]},
            "all_albums": {"index_permissions": [{"index_patterns": ["albums"],
                "allowed_actions": ["indices:data/read/*"]}]},
            "jazz_albums": {"index_permissions": [{"index_patterns": ["albums"],
                "allowed_actions": ["indices:data/read/*"], "dls": "{\"term\":{\"genre\":\"jazz\"}}"}]},
            "rock_catalog": {"index_permissions": [{"index_patterns": ["songs", "albums"],
                "allowed_actions": ["indices:data/read/*"], "dls": "{\"term\":{\"genre\":\"rock\"}}"}]}
        }"#;

        const MAPPING: &str = r#"{
            "rock_songs": {"backend_roles": ["rock_songs"]},
            "all_albums": {"backend_roles": ["all_albums"]},
            "jazz_albums": {"backend_roles": ["jazz_albums"]},
            "rock_catalog": {"backend_roles": ["rock_catalog"]}
        }"#;

        fn snapshot() -> Arc<SecuritySnapshot> {
            let registry = RoleRegistry::new();
            registry.install(ConfigType::Roles, ROLES, 1).unwrap();
            registry.install(ConfigType::RolesMapping, MAPPING, 1).unwrap();
            registry.snapshot()
        }

        fn decision(roles: &[&str]) -> AuthorizationDecision {
            let principal = Principal::new("u").with_backend_roles(roles.iter().copied());
            let targets = vec!["songs".to_string(), "albums".to_string()];
            let decision = PrivilegeEvaluator::new().evaluate(&snapshot(), &principal, "indices:data/read/search", &targets);
            assert!(decision.is_allowed());
            decision
        }

        fn any_genre(genre: &str) -> Value {
            json!({"bool": {"should": [{"term": {"genre": genre}}], "minimum_should_match": 1}})
        }

        #[test]
        fn test_unrestricted_index_does_not_widen_restricted_one() {
            let original = json!({"match": {"title": "blue"}});
            let rewritten = rewrite_for_decision(Some(&original), &decision(&["rock_songs", "all_albums"]));

            assert_eq!(
                rewritten,
                json!({"bool": {
                    "must": [{"match": {"title": "blue"}}],
                    "filter": [{"bool": {
                        "should": [
                            {"term": {"_index": "albums"}},
                            {"bool": {"filter": [{"term": {"_index": "songs"}}, any_genre("rock")]}}
                        ],
                        "minimum_should_match": 1
                    }}]
                }})
            );
        }

        #[test]
        fn test_differently_restricted_indices_are_scoped() {
            let rewritten = rewrite_for_decision(None, &decision(&["rock_songs", "jazz_albums"]));

            assert_eq!(rewritten["bool"]["must"], json!([{"match_all": {}}]));
            assert_eq!(
                rewritten["bool"]["filter"][0]["bool"]["should"],
                json!([
                    {"bool": {"filter": [{"term": {"_index": "albums"}}, any_genre("jazz")]}},
                    {"bool": {"filter": [{"term": {"_index": "songs"}}, any_genre("rock")]}}
                ])
            );
        }

        #[test]
        fn test_identical_directives_use_plain_form() {
            let original = json!({"match": {"title": "blue"}});
            let rewritten = rewrite_for_decision(Some(&original), &decision(&["rock_catalog"]));

            assert_eq!(
                rewritten,
                json!({"bool": {"must": [{"match": {"title": "blue"}}], "filter": [any_genre("rock")]}})
            );
            assert!(!rewritten.to_string().contains("_index"));
        }

        #[test]
        fn test_all_unrestricted_leaves_query() {
            let original = json!({"match": {"title": "blue"}});
            let principal = Principal::new("u").with_backend_role("all_albums");
            let decision = PrivilegeEvaluator::new().evaluate(
                &snapshot(),
                &principal,
                "indices:data/read/search",
                &["albums".to_string()],
            );
            assert_eq!(rewrite_for_decision(Some(&original), &decision), original);
        }
    }

    #[test]
    fn test_missing_query_uses_match_all() {
        let directive = DlsDirective::Restricted(vec![fragment("rock", "rock")]);
        let rewritten = rewrite_query(None, &directive);
        assert_eq!(rewritten["bool"]["must"][0], json!({"match_all": {}}));
    }
}
