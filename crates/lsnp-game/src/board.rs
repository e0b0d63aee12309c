//! The 3x3 grid. Cells are numbered 0-8, row-major.

use std::fmt;

use lsnp_protocol::Symbol;

use crate::MoveError;

/// Rows, columns, diagonals.
pub const WIN_LINES: [[u8; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardOutcome {
    Win { symbol: Symbol, line: [u8; 3] },
    Draw,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Board {
    cells: [Option<Symbol>; 9],
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, position: u8) -> Option<Symbol> {
        self.cells.get(position as usize).copied().flatten()
    }

    pub fn place(&mut self, position: u8, symbol: Symbol) -> Result<(), MoveError> {
        let cell = self
            .cells
            .get_mut(position as usize)
            .ok_or(MoveError::OutOfRange(position))?;
        if cell.is_some() {
            return Err(MoveError::Occupied(position));
        }
        *cell = Some(symbol);
        Ok(())
    }

    pub fn moves(&self) -> u32 {
        self.cells.iter().filter(|c| c.is_some()).count() as u32
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    /// Win if any line holds three of one symbol, else draw if full.
    pub fn outcome(&self) -> Option<BoardOutcome> {
        for line in WIN_LINES {
            let [a, b, c] = line.map(|i| self.cells[i as usize]);
            if let Some(symbol) = a {
                if b == Some(symbol) && c == Some(symbol) {
                    return Some(BoardOutcome::Win { symbol, line });
                }
            }
        }
        self.is_full().then_some(BoardOutcome::Draw)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..3u8 {
            if row > 0 {
                writeln!(f, "---+---+---")?;
            }
            let cells: Vec<String> = (0..3u8)
                .map(|col| {
                    let pos = row * 3 + col;
                    match self.get(pos) {
                        Some(symbol) => symbol.to_string(),
                        None => pos.to_string(),
                    }
                })
                .collect();
            writeln!(f, " {} | {} | {}", cells[0], cells[1], cells[2])?;
        }
        Ok(())
    }
}
