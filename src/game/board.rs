//! Board Layout
//!
//! A board is a flat array of tiles, each safe (0) or a bomb (1). Boards are
//! generated as rows ("tower" layout, one bomb per row) and flattened
//! row-major before encryption.
//!
//! ## Packed encoding
//!
//! ```text
//! tiles:  [0, 0, 1, 0, 0]
//! bits:    b0 b1 b2 b3 b4      (least-significant bit first)
//! packed:  0b00100 = 4
//! ```

use serde::{Deserialize, Serialize};

use crate::core::rng::DeterministicRng;

/// Largest board the ledger accepts (`uint8` board size).
pub const MAX_BOARD_SIZE: usize = u8::MAX as usize;

/// Largest board that fits the packed (single `uint64`) encoding.
pub const MAX_PACKED_SIZE: usize = 64;

/// A single tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Tile {
    /// No bomb.
    #[default]
    Safe = 0,
    /// Bomb.
    Bomb = 1,
}

impl Tile {
    /// Whether this tile is a bomb.
    #[inline]
    pub fn is_bomb(self) -> bool {
        self == Tile::Bomb
    }
}

impl TryFrom<u8> for Tile {
    type Error = BoardError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tile::Safe),
            1 => Ok(Tile::Bomb),
            other => Err(BoardError::InvalidTile(other)),
        }
    }
}

impl From<Tile> for u8 {
    fn from(tile: Tile) -> u8 {
        tile as u8
    }
}

/// Board construction and encoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// Board has no tiles.
    #[error("board is empty")]
    Empty,
    /// Board exceeds the ledger's size limit.
    #[error("board has {0} tiles, maximum is {MAX_BOARD_SIZE}")]
    TooLarge(usize),
    /// Board exceeds the packed encoding's 64-tile ceiling.
    #[error("board has {0} tiles, packed encoding holds at most {MAX_PACKED_SIZE}")]
    TooLargeToPack(usize),
    /// Tile value other than 0 or 1.
    #[error("invalid tile value {0}")]
    InvalidTile(u8),
    /// Packed value has bits set beyond the board size.
    #[error("packed board has bits set beyond tile {0}")]
    StrayBits(usize),
}

/// A validated tile array.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Tile>", into = "Vec<Tile>")]
pub struct Board {
    tiles: Vec<Tile>,
}

impl TryFrom<Vec<Tile>> for Board {
    type Error = BoardError;

    fn try_from(tiles: Vec<Tile>) -> Result<Self, Self::Error> {
        Board::new(tiles)
    }
}

impl From<Board> for Vec<Tile> {
    fn from(board: Board) -> Vec<Tile> {
        board.tiles
    }
}

impl Board {
    /// Create a board, enforcing 1..=255 tiles.
    pub fn new(tiles: Vec<Tile>) -> Result<Self, BoardError> {
        if tiles.is_empty() {
            return Err(BoardError::Empty);
        }
        if tiles.len() > MAX_BOARD_SIZE {
            return Err(BoardError::TooLarge(tiles.len()));
        }
        Ok(Self { tiles })
    }

    /// Create a board from 0/1 values.
    pub fn from_bits(bits: &[u8]) -> Result<Self, BoardError> {
        let tiles = bits
            .iter()
            .map(|b| Tile::try_from(*b))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(tiles)
    }

    /// Tiles as 0/1 values.
    pub fn to_bits(&self) -> Vec<u8> {
        self.tiles.iter().map(|t| *t as u8).collect()
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Always false; boards have at least one tile.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Board size as stored on the ledger.
    pub fn size(&self) -> u8 {
        // Bounded by MAX_BOARD_SIZE at construction.
        self.tiles.len() as u8
    }

    /// Tile at `index`.
    pub fn tile(&self, index: usize) -> Option<Tile> {
        self.tiles.get(index).copied()
    }

    /// Whether the tile at `index` is a bomb (false when out of range).
    pub fn is_bomb(&self, index: usize) -> bool {
        self.tile(index).map(Tile::is_bomb).unwrap_or(false)
    }

    /// All tiles.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Number of bombs.
    pub fn bomb_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_bomb()).count()
    }

    /// Pack into a u64, tile `i` at bit `i`.
    pub fn pack(&self) -> Result<u64, BoardError> {
        if self.tiles.len() > MAX_PACKED_SIZE {
            return Err(BoardError::TooLargeToPack(self.tiles.len()));
        }
        Ok(self
            .tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_bomb())
            .fold(0u64, |acc, (i, _)| acc | (1u64 << i)))
    }

    /// Unpack `size` tiles from a packed value: tile `i = (packed >> i) & 1`.
    ///
    /// Bits at or above `size` are ignored, as the reveal path does.
    pub fn unpack(packed: u64, size: usize) -> Result<Self, BoardError> {
        if size > MAX_PACKED_SIZE {
            return Err(BoardError::TooLargeToPack(size));
        }
        let tiles = (0..size)
            .map(|i| if (packed >> i) & 1 == 1 { Tile::Bomb } else { Tile::Safe })
            .collect();
        Self::new(tiles)
    }

    /// Like [`Board::unpack`], but rejects bits set beyond `size`.
    pub fn unpack_strict(packed: u64, size: usize) -> Result<Self, BoardError> {
        let board = Self::unpack(packed, size)?;
        if size < MAX_PACKED_SIZE && packed >> size != 0 {
            return Err(BoardError::StrayBits(size));
        }
        Ok(board)
    }
}

/// Difficulty presets controlling row widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Wide rows.
    Easy,
    /// Mixed rows.
    #[default]
    Medium,
    /// Narrow rows.
    Hard,
}

impl Difficulty {
    /// Inclusive column range for row `row`.
    fn columns(self, row: usize) -> (u32, u32) {
        match (self, row) {
            (Difficulty::Easy, 0) => (5, 6),
            (Difficulty::Easy, _) => (3, 4),
            (Difficulty::Medium, 0) => (4, 6),
            (Difficulty::Medium, _) => (2, 4),
            (Difficulty::Hard, _) => (2, 3),
        }
    }
}

/// Row-structured board, one bomb per row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowBoard {
    rows: Vec<Vec<Tile>>,
}

impl RowBoard {
    /// Generate `rows` rows for the given difficulty.
    pub fn generate(rng: &mut DeterministicRng, rows: usize, difficulty: Difficulty) -> Self {
        let rows = (0..rows)
            .map(|r| {
                let (min, max) = difficulty.columns(r);
                let cols = rng.next_int_range(min, max) as usize;
                let bomb = rng.next_int(cols as u32) as usize;
                (0..cols)
                    .map(|c| if c == bomb { Tile::Bomb } else { Tile::Safe })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    /// The rows.
    pub fn rows(&self) -> &[Vec<Tile>] {
        &self.rows
    }

    /// Flat index of (`row`, `col`), if in range.
    pub fn flat_index(&self, row: usize, col: usize) -> Option<usize> {
        let width = self.rows.get(row)?.len();
        if col >= width {
            return None;
        }
        Some(self.rows[..row].iter().map(Vec::len).sum::<usize>() + col)
    }

    /// Flatten row-major into a [`Board`].
    pub fn flatten(&self) -> Result<Board, BoardError> {
        Board::new(self.rows.iter().flatten().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pack_lsb_first() {
        let board = Board::from_bits(&[0, 0, 1, 0, 0]).unwrap();
        assert_eq!(board.pack().unwrap(), 0b00100);

        let board = Board::from_bits(&[1, 0, 0, 1]).unwrap();
        assert_eq!(board.pack().unwrap(), 0b1001);
    }

    #[test]
    fn test_pack_rejects_oversized() {
        let board = Board::new(vec![Tile::Safe; 65]).unwrap();
        assert_eq!(board.pack(), Err(BoardError::TooLargeToPack(65)));
        assert_eq!(Board::unpack(0, 65), Err(BoardError::TooLargeToPack(65)));
    }

    #[test]
    fn test_board_bounds() {
        assert_eq!(Board::new(vec![]), Err(BoardError::Empty));
        assert_eq!(Board::new(vec![Tile::Safe; 256]), Err(BoardError::TooLarge(256)));
        assert!(Board::new(vec![Tile::Safe; 255]).is_ok());
        assert_eq!(Board::from_bits(&[0, 2]), Err(BoardError::InvalidTile(2)));
    }

    #[test]
    fn test_unpack_strict_stray_bits() {
        assert!(Board::unpack(0b100000, 5).is_ok());
        assert_eq!(Board::unpack_strict(0b100000, 5), Err(BoardError::StrayBits(5)));
        assert!(Board::unpack_strict(u64::MAX, 64).is_ok());
    }

    #[test]
    fn test_board_json_is_bit_array() {
        let board = Board::from_bits(&[0, 1, 0]).unwrap();
        assert_eq!(serde_json::to_string(&board).unwrap(), "[0,1,0]");
        let back: Board = serde_json::from_str("[0,1,0]").unwrap();
        assert_eq!(back, board);
        assert!(serde_json::from_str::<Board>("[0,3]").is_err());
        assert!(serde_json::from_str::<Board>("[]").is_err());
    }

    #[test]
    fn test_generate_one_bomb_per_row() {
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            let mut rng = DeterministicRng::new(99);
            let board = RowBoard::generate(&mut rng, 6, difficulty);
            assert_eq!(board.rows().len(), 6);
            for (r, row) in board.rows().iter().enumerate() {
                let (min, max) = difficulty.columns(r);
                assert!(row.len() >= min as usize && row.len() <= max as usize);
                assert_eq!(row.iter().filter(|t| t.is_bomb()).count(), 1);
            }
            let flat = board.flatten().unwrap();
            assert_eq!(flat.bomb_count(), 6);
            assert!(flat.len() <= MAX_PACKED_SIZE);
        }
    }

    #[test]
    fn test_generate_is_reproducible() {
        let a = RowBoard::generate(&mut DeterministicRng::new(7), 6, Difficulty::Medium);
        let b = RowBoard::generate(&mut DeterministicRng::new(7), 6, Difficulty::Medium);
        assert_eq!(a, b);
    }

    #[test]
    fn test_flat_index() {
        let mut rng = DeterministicRng::new(3);
        let board = RowBoard::generate(&mut rng, 3, Difficulty::Hard);
        let first = board.rows()[0].len();
        assert_eq!(board.flat_index(0, 0), Some(0));
        assert_eq!(board.flat_index(1, 0), Some(first));
        assert_eq!(board.flat_index(0, first), None);
        assert_eq!(board.flat_index(3, 0), None);
    }

    proptest! {
        #[test]
        fn prop_pack_unpack_round_trip(bits in prop::collection::vec(0u8..=1, 1..=64)) {
            let board = Board::from_bits(&bits).unwrap();
            let packed = board.pack().unwrap();
            let unpacked = Board::unpack_strict(packed, bits.len()).unwrap();
            prop_assert_eq!(unpacked, board);
        }
    }
}
