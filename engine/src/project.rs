use crate::classify::Phase;
use gridstake_types::{Cell, SessionRecord, BOARD_CELLS};

/// One renderable cell: its mark and whether a click may target it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CellView {
    pub mark: Cell,
    pub interactive: bool,
}

/// The renderable board handed to the render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BoardView {
    pub cells: [CellView; BOARD_CELLS],
}

impl BoardView {
    /// Whether `index` may currently be clicked. Out-of-range indexes are
    /// simply not interactive.
    pub fn interactive(&self, index: usize) -> bool {
        self.cells
            .get(index)
            .map(|cell| cell.interactive)
            .unwrap_or(false)
    }

    /// Indices of the currently clickable cells.
    pub fn interactive_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.interactive)
            .map(|(index, _)| index)
    }
}

/// Project the record into renderable cells.
///
/// Eligibility comes from the freshly classified phase of the same record,
/// never from an earlier render pass: a cell is interactive only while it is
/// empty and the match awaits the player's move. Non-empty cells and cells
/// outside `Active(Player)` are never interactive.
pub fn project(record: &SessionRecord, phase: Phase) -> BoardView {
    let player_turn = phase.is_player_turn();
    let mut cells = [CellView::default(); BOARD_CELLS];
    for (index, mark) in record.board.cells().iter().enumerate() {
        cells[index] = CellView {
            mark: *mark,
            interactive: player_turn && mark.is_empty(),
        };
    }
    BoardView { cells }
}
