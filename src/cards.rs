//! Card catalog: precomputed pool of 5x5 bingo layouts.
//!
//! Columns B,I,N,G,O each hold five distinct numbers from their own 15-wide
//! range; the center cell is a permanent wildcard. The catalog is generated
//! once and read-only afterwards. No cross-card uniqueness is enforced.

use crate::errors::CardError;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Grid side length.
pub const GRID: usize = 5;
/// Sentinel value of the free center cell.
pub const WILDCARD: u8 = 0;
/// Width of each column's number range.
pub const COLUMN_RANGE: u8 = 15;
/// Highest callable number.
pub const MAX_NUMBER: u8 = COLUMN_RANGE * GRID as u8;

/// Immutable 5x5 layout, column-major: `columns[col][row]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    id: u32,
    columns: [[u8; GRID]; GRID],
}

impl Card {
    /// Build a card from explicit columns; the center cell is forced to the
    /// wildcard regardless of input. Used by the generator and by
    /// deterministic test fixtures.
    pub fn from_columns(id: u32, mut columns: [[u8; GRID]; GRID]) -> Self {
        columns[GRID / 2][GRID / 2] = WILDCARD;
        Self { id, columns }
    }

    fn generate(id: u32, rng: &mut impl Rng) -> Self {
        let mut columns = [[0u8; GRID]; GRID];
        for (col, column) in columns.iter_mut().enumerate() {
            let low = col as u8 * COLUMN_RANGE + 1;
            let mut range: Vec<u8> = (low..low + COLUMN_RANGE).collect();
            range.shuffle(rng);
            column.copy_from_slice(&range[..GRID]);
        }
        Self::from_columns(id, columns)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn value_at(&self, col: usize, row: usize) -> u8 {
        self.columns[col][row]
    }

    pub fn is_wildcard(col: usize, row: usize) -> bool {
        col == GRID / 2 && row == GRID / 2
    }

    /// Position of a called number on this card, if present. Each number can
    /// appear at most once because column ranges are disjoint and values
    /// within a column are distinct.
    pub fn position_of(&self, number: u8) -> Option<(usize, usize)> {
        if number == WILDCARD || number > MAX_NUMBER {
            return None;
        }
        let col = (number - 1) as usize / COLUMN_RANGE as usize;
        self.columns[col]
            .iter()
            .position(|&value| value == number)
            .map(|row| (col, row))
    }
}

/// Read-only pool of generated cards addressable by id in `1..=pool_size`.
pub struct Catalog {
    cards: Vec<Card>,
}

impl Catalog {
    /// Generate `pool_size` cards. Values are random; only the structure is
    /// deterministic.
    pub fn generate(pool_size: u32, rng: &mut impl Rng) -> Self {
        let cards = (1..=pool_size).map(|id| Card::generate(id, rng)).collect();
        Self { cards }
    }

    /// Build a catalog from explicit cards, ids re-assigned to `1..=n`.
    /// Intended for deterministic fixtures.
    pub fn from_cards(cards: Vec<Card>) -> Self {
        let cards = cards
            .into_iter()
            .enumerate()
            .map(|(i, card)| Card {
                id: i as u32 + 1,
                ..card
            })
            .collect();
        Self { cards }
    }

    pub fn lookup(&self, card_id: u32) -> Result<&Card, CardError> {
        if card_id == 0 || card_id as usize > self.cards.len() {
            return Err(CardError::InvalidCardId {
                id: card_id,
                pool_size: self.cards.len() as u32,
            });
        }
        Ok(&self.cards[card_id as usize - 1])
    }

    pub fn pool_size(&self) -> u32 {
        self.cards.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_column_ranges_and_distinctness() {
        let mut rng = StdRng::seed_from_u64(7);
        let catalog = Catalog::generate(50, &mut rng);

        for id in 1..=50 {
            let card = catalog.lookup(id).unwrap();
            for col in 0..GRID {
                let low = col as u8 * COLUMN_RANGE + 1;
                let high = low + COLUMN_RANGE - 1;
                let mut seen = std::collections::HashSet::new();
                for row in 0..GRID {
                    let value = card.value_at(col, row);
                    if Card::is_wildcard(col, row) {
                        assert_eq!(value, WILDCARD);
                        continue;
                    }
                    assert!(value >= low && value <= high, "value {} out of column range", value);
                    assert!(seen.insert(value), "duplicate {} in column {}", value, col);
                }
            }
        }
    }

    #[test]
    fn test_center_is_wildcard() {
        let mut rng = StdRng::seed_from_u64(1);
        let catalog = Catalog::generate(1, &mut rng);
        assert_eq!(catalog.lookup(1).unwrap().value_at(2, 2), WILDCARD);
    }

    #[test]
    fn test_lookup_bounds() {
        let mut rng = StdRng::seed_from_u64(2);
        let catalog = Catalog::generate(10, &mut rng);

        assert!(catalog.lookup(1).is_ok());
        assert!(catalog.lookup(10).is_ok());
        assert!(matches!(
            catalog.lookup(0),
            Err(CardError::InvalidCardId { id: 0, .. })
        ));
        assert!(matches!(
            catalog.lookup(11),
            Err(CardError::InvalidCardId { id: 11, .. })
        ));
    }

    #[test]
    fn test_position_of_called_number() {
        let card = Card::from_columns(
            1,
            [
                [1, 2, 3, 4, 5],
                [16, 17, 18, 19, 20],
                [31, 32, 33, 34, 35],
                [46, 47, 48, 49, 50],
                [61, 62, 63, 64, 65],
            ],
        );

        assert_eq!(card.position_of(17), Some((1, 1)));
        assert_eq!(card.position_of(65), Some((4, 4)));
        // 33 was displaced by the wildcard
        assert_eq!(card.position_of(33), None);
        assert_eq!(card.position_of(15), None);
        assert_eq!(card.position_of(76), None);
        assert_eq!(card.position_of(WILDCARD), None);
    }
}
