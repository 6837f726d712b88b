//! Injects named scopes into every node of an eager expression.

use crate::error::RelationError;
use crate::relation::{RelationDefinition, RelationExpression};
use serde_json::Value;

/// Read-only view of compiled models needed to walk an eager expression.
pub trait RelationGraph {
    fn relation(&self, model: &str, name: &str) -> Option<&RelationDefinition>;
    fn has_scope(&self, model: &str, scope: &str) -> bool;
}

pub struct EagerScopeResolver;

impl EagerScopeResolver {
    /// Parse `raw` and apply `scopes` to every relation node below the root.
    pub fn apply(
        graph: &dyn RelationGraph,
        model: &str,
        raw: &Value,
        scopes: &[String],
        available_filters: &[String],
        prepend: bool,
    ) -> Result<RelationExpression, RelationError> {
        let expression = RelationExpression::parse(raw)?;
        Self::apply_expression(graph, model, expression, scopes, available_filters, prepend)
    }

    /// Same as [`EagerScopeResolver::apply`] for an already parsed root.
    pub fn apply_expression(
        graph: &dyn RelationGraph,
        model: &str,
        mut expression: RelationExpression,
        scopes: &[String],
        available_filters: &[String],
        prepend: bool,
    ) -> Result<RelationExpression, RelationError> {
        Self::apply_node(graph, model, &mut expression, scopes, available_filters, prepend, true)?;
        Ok(expression)
    }

    /// Every arg below the root must name a scope of its node's model or one of
    /// `available_filters`; the first that does neither is reported.
    pub fn check_modifiers(
        graph: &dyn RelationGraph,
        model: &str,
        expression: &RelationExpression,
        available_filters: &[String],
    ) -> Result<(), RelationError> {
        for (name, child) in &expression.children {
            let relation = graph
                .relation(model, name)
                .ok_or_else(|| RelationError::InvalidChild(name.clone()))?;
            if let Some(arg) = child
                .args
                .iter()
                .find(|arg| !graph.has_scope(&relation.related, arg) && !available_filters.contains(*arg))
            {
                return Err(RelationError::UnknownModifier {
                    model: relation.related.clone(),
                    name: arg.clone(),
                });
            }
            Self::check_modifiers(graph, &relation.related, child, available_filters)?;
        }
        Ok(())
    }

    fn apply_node(
        graph: &dyn RelationGraph,
        model: &str,
        node: &mut RelationExpression,
        scopes: &[String],
        available_filters: &[String],
        prepend: bool,
        is_root: bool,
    ) -> Result<(), RelationError> {
        if !is_root {
            // Prepending walks the list backwards so the scopes keep their given order at the front.
            let ordered: Box<dyn Iterator<Item = &String>> = if prepend {
                Box::new(scopes.iter().rev())
            } else {
                Box::new(scopes.iter())
            };
            for scope in ordered {
                if node.args.contains(scope) {
                    continue;
                }
                if graph.has_scope(model, scope) || available_filters.contains(scope) {
                    node.add_arg(scope, prepend);
                }
            }
        }
        for (name, child) in node.children.iter_mut() {
            let relation = graph
                .relation(model, name)
                .ok_or_else(|| RelationError::InvalidChild(name.clone()))?;
            Self::apply_node(
                graph,
                &relation.related,
                child,
                scopes,
                available_filters,
                prepend,
                false,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{JoinSpec, RelationKind};
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    struct Graph {
        relations: HashMap<(String, String), RelationDefinition>,
        scopes: HashSet<(String, String)>,
    }

    impl RelationGraph for Graph {
        fn relation(&self, model: &str, name: &str) -> Option<&RelationDefinition> {
            self.relations.get(&(model.to_string(), name.to_string()))
        }
        fn has_scope(&self, model: &str, scope: &str) -> bool {
            self.scopes.contains(&(model.to_string(), scope.to_string()))
        }
    }

    fn rel(owner: &str, name: &str, related: &str) -> ((String, String), RelationDefinition) {
        (
            (owner.to_string(), name.to_string()),
            RelationDefinition {
                name: name.to_string(),
                kind: RelationKind::HasMany,
                owner: owner.to_string(),
                related: related.to_string(),
                join: JoinSpec {
                    from: vec![],
                    to: vec![],
                    through: None,
                },
                modify: None,
                options: Default::default(),
            },
        )
    }

    fn graph() -> Graph {
        Graph {
            relations: [
                rel("User", "posts", "Post"),
                rel("Post", "comments", "Comment"),
                rel("Post", "author", "User"),
            ]
            .into_iter()
            .collect(),
            scopes: [("Post", "published"), ("Comment", "approved"), ("User", "active")]
                .into_iter()
                .map(|(m, s)| (m.to_string(), s.to_string()))
                .collect(),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn adds_known_scopes_below_root_only() {
        let scopes = names(&["published", "approved", "unknown"]);
        let expr = EagerScopeResolver::apply(&graph(), "User", &json!("posts.comments"), &scopes, &[], false).unwrap();
        assert!(expr.args.is_empty());
        let posts = &expr.children["posts"];
        assert_eq!(posts.args, vec!["published"]);
        assert_eq!(posts.children["comments"].args, vec!["approved"]);
    }

    #[test]
    fn available_filters_apply_to_any_model() {
        let scopes = names(&["sorted"]);
        let filters = names(&["sorted"]);
        let expr = EagerScopeResolver::apply(&graph(), "User", &json!("posts.author"), &scopes, &filters, false).unwrap();
        assert_eq!(expr.children["posts"].args, vec!["sorted"]);
        assert_eq!(expr.children["posts"].children["author"].args, vec!["sorted"]);
    }

    #[test]
    fn prepend_inserts_at_front_in_order() {
        let scopes = names(&["a", "b"]);
        let expr = EagerScopeResolver::apply(&graph(), "User", &json!("posts(published)"), &scopes, &scopes, true).unwrap();
        assert_eq!(expr.children["posts"].args, vec!["a", "b", "published"]);
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let scopes = names(&["published", "approved", "active"]);
        let once = EagerScopeResolver::apply(
            &graph(),
            "User",
            &json!("[posts(published).[comments, author]]"),
            &scopes,
            &[],
            false,
        )
        .unwrap();
        let twice = EagerScopeResolver::apply_expression(&graph(), "User", once.clone(), &scopes, &[], false).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.children["posts"].args, vec!["published"]);
        assert_eq!(twice.children["posts"].children["author"].args, vec!["active"]);
    }

    #[test]
    fn modifiers_must_be_scopes_or_available_filters() {
        let expr = RelationExpression::parse(&json!("posts(published).comments(recent)")).unwrap();
        let err = EagerScopeResolver::check_modifiers(&graph(), "User", &expr, &[]).unwrap_err();
        assert_eq!(
            err,
            RelationError::UnknownModifier {
                model: "Comment".into(),
                name: "recent".into()
            }
        );
        assert!(EagerScopeResolver::check_modifiers(&graph(), "User", &expr, &names(&["recent"])).is_ok());

        let wrong_model = RelationExpression::parse(&json!("posts(approved)")).unwrap();
        assert!(EagerScopeResolver::check_modifiers(&graph(), "User", &wrong_model, &[]).is_err());
    }

    #[test]
    fn unknown_child_fails() {
        let err = EagerScopeResolver::apply(&graph(), "User", &json!("posts.likes"), &[], &[], false).unwrap_err();
        assert_eq!(err, RelationError::InvalidChild("likes".into()));
        assert_eq!(err.to_string(), "Invalid child expression: likes");
    }
}
