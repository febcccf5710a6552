//! Actor identity for Stagehand
//!
//! TigerStyle: Explicit types, validation on construction, immutable after.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// KeyTag
// =============================================================================

/// One element of an actor key
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyTag {
    Int(i64),
    Str(String),
}

impl fmt::Display for KeyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyTag::Int(n) => write!(f, "{}", n),
            KeyTag::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for KeyTag {
    fn from(value: &str) -> Self {
        KeyTag::Str(value.to_string())
    }
}

impl From<String> for KeyTag {
    fn from(value: String) -> Self {
        KeyTag::Str(value)
    }
}

impl From<&String> for KeyTag {
    fn from(value: &String) -> Self {
        KeyTag::Str(value.clone())
    }
}

impl From<i64> for KeyTag {
    fn from(value: i64) -> Self {
        KeyTag::Int(value)
    }
}

impl From<i32> for KeyTag {
    fn from(value: i32) -> Self {
        KeyTag::Int(i64::from(value))
    }
}

impl From<u32> for KeyTag {
    fn from(value: u32) -> Self {
        KeyTag::Int(i64::from(value))
    }
}

// =============================================================================
// ActorKey
// =============================================================================

/// Ordered tags identifying one instance within an actor type
///
/// An empty key is valid and names the singleton instance of its type.
/// Keys decoded from JSON go through the same checks as [`ActorKey::new`].
#[derive(Debug, Clone, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeyTag>", into = "Vec<KeyTag>")]
pub struct ActorKey(Vec<KeyTag>);

impl ActorKey {
    /// Create a key from tags with validation
    ///
    /// # Errors
    /// Returns error if there are too many tags or a string tag is too long.
    pub fn new<I, T>(tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<KeyTag>,
    {
        let tags: Vec<KeyTag> = tags.into_iter().map(Into::into).collect();

        if tags.len() > ACTOR_KEY_TAGS_COUNT_MAX {
            return Err(Error::InvalidActorId {
                id: format!("{:?}", tags),
                reason: format!(
                    "key has {} tags, limit is {}",
                    tags.len(),
                    ACTOR_KEY_TAGS_COUNT_MAX
                ),
            });
        }

        for tag in &tags {
            if let KeyTag::Str(s) = tag {
                if s.len() > ACTOR_KEY_TAG_LENGTH_BYTES_MAX {
                    return Err(Error::InvalidActorId {
                        id: format!("{:?}", tags),
                        reason: format!(
                            "key tag length {} exceeds limit {}",
                            s.len(),
                            ACTOR_KEY_TAG_LENGTH_BYTES_MAX
                        ),
                    });
                }
            }
        }

        Ok(Self(tags))
    }

    /// The empty key
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// The tags in order
    pub fn tags(&self) -> &[KeyTag] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl TryFrom<Vec<KeyTag>> for ActorKey {
    type Error = Error;

    fn try_from(tags: Vec<KeyTag>) -> Result<Self> {
        ActorKey::new(tags)
    }
}

impl From<ActorKey> for Vec<KeyTag> {
    fn from(key: ActorKey) -> Self {
        key.0
    }
}

impl IntoIterator for ActorKey {
    type Item = KeyTag;
    type IntoIter = std::vec::IntoIter<KeyTag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", tag)?;
        }
        write!(f, "]")
    }
}

// =============================================================================
// ActorId
// =============================================================================

/// Unique identifier for an actor instance: actor type plus key
///
/// # TigerStyle
/// - Explicit validation on construction
/// - Immutable after creation
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedActorId")]
pub struct ActorId {
    actor_type: String,
    key: ActorKey,
}

/// Wire form of [`ActorId`] before the type name is checked
#[derive(Deserialize)]
struct UncheckedActorId {
    actor_type: String,
    key: ActorKey,
}

impl TryFrom<UncheckedActorId> for ActorId {
    type Error = Error;

    fn try_from(raw: UncheckedActorId) -> Result<Self> {
        ActorId::new(raw.actor_type, raw.key)
    }
}

impl ActorId {
    /// Create a new ActorId with validation
    ///
    /// # Errors
    /// Returns error if the type name is empty, too long, or contains
    /// characters outside alphanumerics, dash, underscore and dot.
    pub fn new(actor_type: impl Into<String>, key: ActorKey) -> Result<Self> {
        let actor_type = actor_type.into();
        validate_actor_type(&actor_type)?;
        Ok(Self { actor_type, key })
    }

    /// Get the actor type name
    pub fn actor_type(&self) -> &str {
        &self.actor_type
    }

    /// Get the key
    pub fn key(&self) -> &ActorKey {
        &self.key
    }

    /// Stable string used as the persistence key (`type/[json tags]`)
    pub fn storage_key(&self) -> String {
        // Tags are i64 or String, so encoding cannot fail.
        let tags = serde_json::to_string(self.key.tags()).unwrap_or_default();
        format!("{}/{}", self.actor_type, tags)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.actor_type, self.key)
    }
}

/// Validate an actor type name
pub fn validate_actor_type(actor_type: &str) -> Result<()> {
    if actor_type.is_empty() {
        return Err(Error::InvalidActorId {
            id: actor_type.to_string(),
            reason: "actor type must not be empty".into(),
        });
    }

    if actor_type.len() > ACTOR_TYPE_LENGTH_BYTES_MAX {
        return Err(Error::InvalidActorId {
            id: actor_type.to_string(),
            reason: format!(
                "actor type length {} exceeds limit {}",
                actor_type.len(),
                ACTOR_TYPE_LENGTH_BYTES_MAX
            ),
        });
    }

    let valid = actor_type
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(Error::InvalidActorId {
            id: actor_type.to_string(),
            reason: "actor type contains invalid characters".into(),
        });
    }

    Ok(())
}
