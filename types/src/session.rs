use crate::BOARD_CELLS;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// State of a single board cell, wire-encoded as `0`/`1`/`2` to match the
/// ledger's board encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Cell {
    #[default]
    Empty = 0,
    Player = 1,
    Opponent = 2,
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Cell::Empty),
            1 => Ok(Cell::Player),
            2 => Ok(Cell::Opponent),
            i => Err(de::Error::custom(format!("invalid cell value: {i}"))),
        }
    }
}

/// The 9-cell match board, row-major, 0-indexed.
///
/// Deserialization rejects any length other than 9, so a `Board` in hand
/// always satisfies the fixed-length invariant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Board([Cell; BOARD_CELLS]);

/// The eight winning lines (rows, columns, diagonals).
const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

impl Board {
    pub fn new(cells: [Cell; BOARD_CELLS]) -> Self {
        Self(cells)
    }

    pub fn cells(&self) -> &[Cell; BOARD_CELLS] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<Cell> {
        self.0.get(index).copied()
    }

    /// Place a mark. Ledger-side only; the core never mutates a board.
    pub fn set(&mut self, index: usize, cell: Cell) {
        self.0[index] = cell;
    }

    pub fn is_full(&self) -> bool {
        self.0.iter().all(|cell| !cell.is_empty())
    }

    /// Indices of empty cells, in row-major order.
    pub fn empty_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_empty())
            .map(|(index, _)| index)
    }

    /// The mark holding a completed line, if any. Used by the ledger side for
    /// terminal detection; the core trusts the record it reads instead.
    pub fn winner(&self) -> Option<Cell> {
        for line in LINES {
            let mark = self.0[line[0]];
            if !mark.is_empty() && self.0[line[1]] == mark && self.0[line[2]] == mark {
                return Some(mark);
            }
        }
        None
    }
}

impl Serialize for Board {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for Board {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cells = Vec::<Cell>::deserialize(deserializer)?;
        let len = cells.len();
        let cells: [Cell; BOARD_CELLS] = cells
            .try_into()
            .map_err(|_| de::Error::custom(format!("invalid board length: {len} (expected 9)")))?;
        Ok(Self(cells))
    }
}

/// Authoritative snapshot of a wagered match for one identity, read from the
/// ledger's session endpoint.
///
/// `player_turn` is meaningful only while `active`; `player_won` only once
/// the match settled with `stake` still attached. The classifier ignores them
/// outside those phases rather than wrapping them on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    pub board: Board,
    pub active: bool,
    pub stake: u64,
    pub player_turn: bool,
    pub player_won: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_json_roundtrip() {
        let mut board = Board::default();
        board.set(0, Cell::Player);
        board.set(4, Cell::Opponent);
        let json = serde_json::to_string(&board).unwrap();
        assert_eq!(json, "[1,0,0,0,2,0,0,0,0]");
        let decoded: Board = serde_json::from_str(&json).unwrap();
        assert_eq!(board, decoded);
    }

    #[test]
    fn test_board_rejects_wrong_length() {
        assert!(serde_json::from_str::<Board>("[0,0,0]").is_err());
        assert!(serde_json::from_str::<Board>("[0,0,0,0,0,0,0,0,0,0]").is_err());
    }

    #[test]
    fn test_board_rejects_unknown_cell() {
        assert!(serde_json::from_str::<Board>("[0,0,0,0,3,0,0,0,0]").is_err());
    }

    #[test]
    fn test_winner_detection() {
        let mut board = Board::default();
        assert_eq!(board.winner(), None);

        // Top row for the player.
        board.set(0, Cell::Player);
        board.set(1, Cell::Player);
        board.set(2, Cell::Player);
        assert_eq!(board.winner(), Some(Cell::Player));

        // Diagonal for the opponent.
        let mut board = Board::default();
        board.set(2, Cell::Opponent);
        board.set(4, Cell::Opponent);
        board.set(6, Cell::Opponent);
        assert_eq!(board.winner(), Some(Cell::Opponent));
    }

    #[test]
    fn test_empty_cells_order() {
        let mut board = Board::default();
        board.set(0, Cell::Player);
        board.set(3, Cell::Opponent);
        let empties: Vec<usize> = board.empty_cells().collect();
        assert_eq!(empties, vec![1, 2, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_record_json_roundtrip() {
        let record = SessionRecord {
            board: Board::default(),
            active: true,
            stake: 5_000,
            player_turn: true,
            player_won: false,
        };
        let json = serde_json::to_string(&record).unwrap();
        let decoded: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_default_record_is_fresh() {
        let record = SessionRecord::default();
        assert!(!record.active);
        assert_eq!(record.stake, 0);
        assert!(record.board.empty_cells().count() == 9);
    }
}
