use crate::error::RelationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsToOne,
    HasOne,
    HasOneThrough,
    HasMany,
    ManyToMany,
}

impl RelationKind {
    /// Whether an eager load of this relation yields a list.
    pub fn is_to_many(self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::ManyToMany)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::BelongsToOne => "belongsToOne",
            RelationKind::HasOne => "hasOne",
            RelationKind::HasOneThrough => "hasOneThrough",
            RelationKind::HasMany => "hasMany",
            RelationKind::ManyToMany => "manyToMany",
        }
    }
}

/// Accepts camelCase, kebab-case and snake_case spellings; `belongsTo` is an alias of `belongsToOne`.
impl FromStr for RelationKind {
    type Err = RelationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "belongsto" | "belongstoone" => Ok(RelationKind::BelongsToOne),
            "hasone" => Ok(RelationKind::HasOne),
            "hasonethrough" => Ok(RelationKind::HasOneThrough),
            "hasmany" => Ok(RelationKind::HasMany),
            "manytomany" => Ok(RelationKind::ManyToMany),
            _ => Err(RelationError::UnrecognizedKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
