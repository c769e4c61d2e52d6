//! Content kinds a run can declare.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of content a run produces.
///
/// Mechanical kinds carry game statistics and are subject to numeric
/// guards; narrative kinds are free-form prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Creature,
    Npc,
    Item,
    Spell,
    Ability,
    Location,
    Lore,
    Adventure,
}

impl ContentKind {
    /// Whether this kind carries game mechanics (stats, usage limits, ranges).
    pub fn is_mechanical(&self) -> bool {
        matches!(
            self,
            Self::Creature | Self::Npc | Self::Item | Self::Spell | Self::Ability
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creature => "creature",
            Self::Npc => "npc",
            Self::Item => "item",
            Self::Spell => "spell",
            Self::Ability => "ability",
            Self::Location => "location",
            Self::Lore => "lore",
            Self::Adventure => "adventure",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creature" | "monster" => Ok(Self::Creature),
            "npc" => Ok(Self::Npc),
            "item" => Ok(Self::Item),
            "spell" => Ok(Self::Spell),
            "ability" | "feat" => Ok(Self::Ability),
            "location" => Ok(Self::Location),
            "lore" => Ok(Self::Lore),
            "adventure" => Ok(Self::Adventure),
            other => Err(format!("unknown content kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mechanical_split() {
        assert!(ContentKind::Creature.is_mechanical());
        assert!(ContentKind::Item.is_mechanical());
        assert!(!ContentKind::Lore.is_mechanical());
        assert!(!ContentKind::Location.is_mechanical());
    }

    #[test]
    fn parse_aliases() {
        assert_eq!("Monster".parse::<ContentKind>().unwrap(), ContentKind::Creature);
        assert_eq!(" lore ".parse::<ContentKind>().unwrap(), ContentKind::Lore);
        assert!("sandwich".parse::<ContentKind>().is_err());
    }
}
