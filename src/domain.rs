// reco_ingestor/src/domain.rs
// Recommendation payloads, entities and the path templates they select.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::IngestorError;
use crate::store::Fields;

/// Schema/version tag attached to every written recommendation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct Meta {
    #[serde(rename = "type")]
    pub kind: String,
    pub ver:  String,
}

/// Full-replace payload written to a recommendations document.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct Recommendations {
    pub items: Vec<String,>,
    pub meta:  Meta,
}

impl Recommendations {
    /// Field map stored under `field_key`, plus the `meta` tag.
    pub fn to_fields(&self, field_key: &str,) -> Fields {
        let mut fields = Fields::new();
        fields.insert(
            field_key.to_string(),
            Value::Array(self.items.iter().cloned().map(Value::String,).collect(),),
        );
        fields.insert(
            "meta".to_string(),
            json!({ "type": self.meta.kind, "ver": self.meta.ver }),
        );
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
pub enum Entity {
    Shows,
    Episodes,
}

impl FromStr for Entity {
    type Err = IngestorError;

    fn from_str(s: &str,) -> Result<Self, Self::Err,> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shows" => Ok(Entity::Shows,),
            "episodes" => Ok(Entity::Episodes,),
            _ => Err(IngestorError::UnknownEntity(s.to_string(),),),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result {
        match self {
            Entity::Shows => f.write_str("shows",),
            Entity::Episodes => f.write_str("episodes",),
        }
    }
}

/// The pair of locations touched for one user.
///
/// `feed_collection` is read and reset, `recommendations_document` is written.
/// They never coincide.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct EntityPaths {
    pub feed_collection:          String,
    pub recommendations_document: String,
    pub field_key:                &'static str,
}

impl Entity {
    pub fn paths(self, user_id: &str,) -> EntityPaths {
        match self {
            Entity::Shows => EntityPaths {
                feed_collection:          format!("users/{}/personalisedShowRecommendations", user_id),
                recommendations_document: format!(
                    "personalisedShowRecommendations/{}/personalisedShows/recommendations",
                    user_id
                ),
                field_key:                "recommendations",
            },
            Entity::Episodes => EntityPaths {
                feed_collection:          format!(
                    "users/{}/personalisedEpisodeRecommendations",
                    user_id
                ),
                recommendations_document: format!(
                    "personalisedEpisodeRecommendations/{}/personalisedEpisodes/recommendations",
                    user_id
                ),
                field_key:                "episodes",
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize,)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UseCase {
    ReadOnly,
    ReadWrite,
    Reset,
}

impl FromStr for UseCase {
    type Err = IngestorError;

    fn from_str(s: &str,) -> Result<Self, Self::Err,> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READ_ONLY" | "READ" => Ok(UseCase::ReadOnly,),
            "READ_WRITE" | "WRITE" => Ok(UseCase::ReadWrite,),
            "RESET" => Ok(UseCase::Reset,),
            _ => Err(IngestorError::UnknownUseCase(s.to_string(),),),
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result {
        match self {
            UseCase::ReadOnly => f.write_str("READ_ONLY",),
            UseCase::ReadWrite => f.write_str("READ_WRITE",),
            UseCase::Reset => f.write_str("RESET",),
        }
    }
}
