//! Card Catalog
//!
//! The catalog is external, read-only data loaded once at startup. Duels only
//! ever hold copies of catalog cards.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;

/// Catalog card identifier.
pub type CardId = u32;

/// Largest attack or defense a catalog card may carry.
pub const MAX_CARD_STAT: i32 = 1000;

/// A card definition from the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Catalog identifier.
    pub id: CardId,
    /// Display name.
    pub name: String,
    /// Attack points.
    #[serde(alias = "attackPts")]
    pub attack: i32,
    /// Defense points.
    #[serde(alias = "defensePts")]
    pub defense: i32,
    /// Mana needed to put the card into play.
    #[serde(default = "default_cost")]
    pub cost: u32,
}

fn default_cost() -> u32 {
    1
}

impl Card {
    /// Create a card with the default cost.
    pub fn new(id: CardId, name: impl Into<String>, attack: i32, defense: i32) -> Self {
        Self {
            id,
            name: name.into(),
            attack,
            defense,
            cost: default_cost(),
        }
    }

    /// Set the mana cost.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }
}

/// Catalog loading errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file could not be read.
    #[error("failed to read card catalog {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Catalog content is not a valid card list.
    #[error("invalid card catalog: {0}")]
    Parse(#[from] serde_json::Error),
    /// Catalog has no cards.
    #[error("card catalog is empty")]
    Empty,
    /// A card stat is negative or above [`MAX_CARD_STAT`].
    #[error("card {id} has {stat} {value}, expected 0..={max}", max = MAX_CARD_STAT)]
    InvalidStat {
        /// Offending card.
        id: CardId,
        /// `attack` or `defense`.
        stat: &'static str,
        /// Value found.
        value: i32,
    },
}

/// Source of catalog cards (database, file, fixture).
pub trait CardSource {
    /// Load every card.
    fn all_cards(&self) -> Result<Vec<Card>, CatalogError>;
}

/// Loads the catalog from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFileCardSource {
    path: PathBuf,
}

impl JsonFileCardSource {
    /// Create a source reading `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CardSource for JsonFileCardSource {
    fn all_cards(&self) -> Result<Vec<Card>, CatalogError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| CatalogError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// The starter set shipped with the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCardSource;

impl CardSource for BuiltinCardSource {
    fn all_cards(&self) -> Result<Vec<Card>, CatalogError> {
        Ok(vec![
            Card::new(1, "Goblin Warrior", 2, 1).with_cost(1),
            Card::new(2, "Forest Wolf", 3, 2).with_cost(2),
            Card::new(3, "Knight Guard", 2, 4).with_cost(3),
            Card::new(4, "Flame Dragon", 5, 3).with_cost(4),
            Card::new(5, "Ice Wizard", 2, 3).with_cost(3),
            Card::new(6, "Ancient Golem", 4, 6).with_cost(5),
            Card::new(7, "Shadow Assassin", 6, 2).with_cost(4),
            Card::new(8, "Dragon Lord", 8, 6).with_cost(7),
            Card::new(9, "Light Goddess", 5, 7).with_cost(6),
            Card::new(10, "Sword of Power", 2, 0).with_cost(2),
            Card::new(11, "Shield of Defense", 0, 3).with_cost(2),
        ])
    }
}

/// Immutable, shareable card catalog.
#[derive(Debug, Clone)]
pub struct CardCatalog {
    cards: Arc<[Card]>,
}

impl CardCatalog {
    /// Build a catalog. Empty lists and out-of-range stats are rejected.
    pub fn new(cards: Vec<Card>) -> Result<Self, CatalogError> {
        if cards.is_empty() {
            return Err(CatalogError::Empty);
        }
        for card in &cards {
            for (stat, value) in [("attack", card.attack), ("defense", card.defense)] {
                if !(0..=MAX_CARD_STAT).contains(&value) {
                    return Err(CatalogError::InvalidStat {
                        id: card.id,
                        stat,
                        value,
                    });
                }
            }
        }
        Ok(Self { cards: cards.into() })
    }

    /// Load from any [`CardSource`].
    pub fn load(source: &dyn CardSource) -> Result<Self, CatalogError> {
        Self::new(source.all_cards()?)
    }

    /// Look up a card by id.
    pub fn get(&self, id: CardId) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == id)
    }

    /// All cards, in catalog order.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Number of distinct cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Always false for a constructed catalog.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Draw `count` cards uniformly, with replacement.
    pub fn draw(&self, rng: &mut DeterministicRng, count: usize) -> Vec<Card> {
        (0..count)
            .filter_map(|_| rng.choose(&self.cards).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(matches!(CardCatalog::new(Vec::new()), Err(CatalogError::Empty)));
    }

    #[test]
    fn test_out_of_range_stats_rejected() {
        let negative = CardCatalog::new(vec![Card::new(1, "Leech", -5, -3)]);
        assert!(matches!(
            negative,
            Err(CatalogError::InvalidStat { id: 1, stat: "attack", value: -5 })
        ));

        let huge = CardCatalog::new(vec![Card::new(1, "Ok", 2, 1), Card::new(2, "Wall", 0, i32::MAX)]);
        assert!(matches!(
            huge,
            Err(CatalogError::InvalidStat { id: 2, stat: "defense", .. })
        ));

        assert!(CardCatalog::new(vec![Card::new(1, "Edge", MAX_CARD_STAT, 0)]).is_ok());
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = CardCatalog::load(&BuiltinCardSource).unwrap();
        assert!(catalog.len() > 5);
        assert_eq!(catalog.get(4).unwrap().name, "Flame Dragon");
        assert!(catalog.get(999).is_none());
    }

    #[test]
    fn test_card_json_accepts_db_field_names() {
        let json = r#"[{"id": 3, "name": "Knight", "attackPts": 2, "defensePts": 4}]"#;
        let cards: Vec<Card> = serde_json::from_str(json).unwrap();
        assert_eq!(cards[0].attack, 2);
        assert_eq!(cards[0].defense, 4);
        assert_eq!(cards[0].cost, 1);
    }

    #[test]
    fn test_draw_with_replacement_from_single_card() {
        let catalog = CardCatalog::new(vec![Card::new(1, "Only", 5, 2)]).unwrap();
        let mut rng = DeterministicRng::new(3);
        let hand = catalog.draw(&mut rng, 3);
        assert_eq!(hand.len(), 3);
        assert!(hand.iter().all(|c| c.id == 1));
    }

    #[test]
    fn test_json_file_source() {
        let path = std::env::temp_dir().join(format!("cards-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"[{"id": 1, "name": "A", "attack": 1, "defense": 1, "cost": 2}]"#)
            .unwrap();

        let catalog = CardCatalog::load(&JsonFileCardSource::new(&path)).unwrap();
        assert_eq!(catalog.get(1).unwrap().cost, 2);
        std::fs::remove_file(&path).unwrap();

        let missing = JsonFileCardSource::new(&path).all_cards();
        assert!(matches!(missing, Err(CatalogError::Io { .. })));
    }
}
