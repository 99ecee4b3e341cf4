//! The shared maze grid.
//!
//! The maze is a rectangular grid of byte cells. A space is an empty cell, an
//! uppercase letter is a player avatar, everything else is a wall: immovable,
//! opaque to view and opaque to lasers. All mutation goes through a single
//! maze-wide lock; no operation calls back into code that could re-enter it.

use std::fmt::Write as _;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Maze used when the server starts without a template file.
pub const DEFAULT_MAZE: &[&str] = &[
    "******************************",
    "***** %%%%%%%%% &&&&&&&&&&& **",
    "***** %%%%%%%%%        $$$$  *",
    "*           $$$$$$ $$$$$$$$$ *",
    "*##########                  *",
    "*########## @@@@@@@@@@@@@@@@@*",
    "*           @@@@@@@@@@@@@@@@@*",
    "******************************",
];

/// An empty maze cell.
pub const EMPTY: u8 = b' ';
/// The filler reported for view cells outside the maze rectangle.
pub const WALL: u8 = b'*';

/// How far down the corridor a player can see.
pub const VIEW_DEPTH: usize = 6;
/// Columns of the view matrix: left wall, corridor, right wall.
pub const VIEW_WIDTH: usize = 3;

pub const LEFT_WALL: usize = 0;
pub const CORRIDOR: usize = 1;
pub const RIGHT_WALL: usize = 2;

/// The slice of the maze a player sees, indexed `[depth][column]`.
pub type View = [[u8; VIEW_WIDTH]; VIEW_DEPTH];

pub fn is_empty(cell: u8) -> bool {
    cell == EMPTY
}

pub fn is_avatar(cell: u8) -> bool {
    cell.is_ascii_uppercase()
}

/// A gaze or movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    West,
    South,
    East,
}

impl Direction {
    /// The (row, col) delta of one step in this direction.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Direction::North => (-1, 0),
            Direction::West => (0, -1),
            Direction::South => (1, 0),
            Direction::East => (0, 1),
        }
    }

    /// One quarter-turn counter-clockwise.
    pub fn turn_left(self) -> Direction {
        match self {
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
            Direction::East => Direction::North,
        }
    }

    /// One quarter-turn clockwise.
    pub fn turn_right(self) -> Direction {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    /// The direction with the negated delta.
    pub fn reverse(self) -> Direction {
        self.turn_left().turn_left()
    }
}

/// Failure of a maze template to describe a usable grid.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template has no rows or an empty first row")]
    Empty,
    #[error("template row {0} differs in length from the first row")]
    Ragged(usize),
    #[error("template row {0} contains non-ASCII characters")]
    NotAscii(usize),
}

/// Failure of a maze mutation.
#[derive(Debug, Error)]
pub enum MazeError {
    #[error("position out of bounds")]
    OutOfBounds,
    #[error("cell is not empty")]
    Occupied,
    #[error("move blocked")]
    Blocked,
    #[error("no free cell found")]
    Exhausted,
}

struct MazeInner {
    cells: Vec<Vec<u8>>,
    rows: usize,
    cols: usize,
    rng: StdRng,
}

impl MazeInner {
    fn in_bounds(&self, row: isize, col: isize) -> bool {
        row >= 0 && (row as usize) < self.rows && col >= 0 && (col as usize) < self.cols
    }

    fn at(&self, row: isize, col: isize) -> u8 {
        self.cells[row as usize][col as usize]
    }

    /// The cell at (row, col), or [`WALL`] when outside the rectangle.
    fn at_or_wall(&self, row: isize, col: isize) -> u8 {
        if self.in_bounds(row, col) {
            self.at(row, col)
        } else {
            WALL
        }
    }
}

/// The shared game maze.
pub struct Maze {
    inner: Mutex<MazeInner>,
}

impl Maze {
    /// Builds a maze from newline-stripped template lines.
    pub fn from_template<S: AsRef<str>>(lines: &[S]) -> Result<Maze, TemplateError> {
        let first = lines.first().ok_or(TemplateError::Empty)?;
        let cols = first.as_ref().len();
        if cols == 0 {
            return Err(TemplateError::Empty);
        }

        let mut cells = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let line = line.as_ref();
            if !line.is_ascii() {
                return Err(TemplateError::NotAscii(i));
            }
            if line.len() != cols {
                return Err(TemplateError::Ragged(i));
            }
            cells.push(line.as_bytes().to_vec());
        }

        let rows = cells.len();
        tracing::debug!(rows, cols, "maze initialized");
        Ok(Maze {
            inner: Mutex::new(MazeInner {
                cells,
                rows,
                cols,
                rng: StdRng::from_entropy(),
            }),
        })
    }

    /// Returns (rows, cols).
    pub fn dimensions(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.rows, inner.cols)
    }

    /// Places `avatar` at (row, col) if the cell is in bounds and empty.
    pub fn place(&self, avatar: u8, row: usize, col: usize) -> Result<(), MazeError> {
        let mut inner = self.inner.lock().unwrap();
        if row >= inner.rows || col >= inner.cols {
            return Err(MazeError::OutOfBounds);
        }
        if !is_empty(inner.cells[row][col]) {
            return Err(MazeError::Occupied);
        }
        inner.cells[row][col] = avatar;
        Ok(())
    }

    /// Places `avatar` at a random empty cell, trying up to 1000 positions.
    ///
    /// Callers must treat the chosen position as non-deterministic.
    pub fn place_random(&self, avatar: u8) -> Result<(usize, usize), MazeError> {
        const MAX_ATTEMPTS: usize = 1000;

        let mut inner = self.inner.lock().unwrap();
        let (rows, cols) = (inner.rows, inner.cols);
        for _ in 0..MAX_ATTEMPTS {
            let row = inner.rng.gen_range(0..rows);
            let col = inner.rng.gen_range(0..cols);
            if is_empty(inner.cells[row][col]) {
                inner.cells[row][col] = avatar;
                return Ok((row, col));
            }
        }
        tracing::debug!(avatar = %(avatar as char), "no free cell after 1000 attempts");
        Err(MazeError::Exhausted)
    }

    /// Clears (row, col) if it currently holds `avatar`.
    ///
    /// A mismatch is a no-op, which makes double removal across a hit/reset
    /// race harmless.
    pub fn remove(&self, avatar: u8, row: usize, col: usize) {
        let mut inner = self.inner.lock().unwrap();
        if row < inner.rows && col < inner.cols && inner.cells[row][col] == avatar {
            inner.cells[row][col] = EMPTY;
        }
    }

    /// Moves the avatar at (row, col) one step in `dir`.
    ///
    /// Succeeds only when the source holds an avatar and the destination is
    /// in bounds and empty; the two cells swap under the lock, so no
    /// intermediate state is observable.
    pub fn move_avatar(&self, row: usize, col: usize, dir: Direction) -> Result<(), MazeError> {
        let mut inner = self.inner.lock().unwrap();
        if row >= inner.rows || col >= inner.cols {
            return Err(MazeError::OutOfBounds);
        }
        if !is_avatar(inner.cells[row][col]) {
            return Err(MazeError::Blocked);
        }

        let (dr, dc) = dir.delta();
        let new_row = row as isize + dr;
        let new_col = col as isize + dc;
        if !inner.in_bounds(new_row, new_col) || !is_empty(inner.at(new_row, new_col)) {
            return Err(MazeError::Blocked);
        }

        let moving = inner.cells[row][col];
        inner.cells[new_row as usize][new_col as usize] = moving;
        inner.cells[row][col] = EMPTY;
        Ok(())
    }

    /// Scans from (row, col) in `dir` for a laser target.
    ///
    /// Returns the first avatar on the path, or `None` when the beam meets a
    /// wall or leaves the maze first.
    pub fn find_target(&self, row: usize, col: usize, dir: Direction) -> Option<u8> {
        let inner = self.inner.lock().unwrap();
        let (dr, dc) = dir.delta();
        let mut r = row as isize;
        let mut c = col as isize;
        loop {
            r += dr;
            c += dc;
            if !inner.in_bounds(r, c) {
                return None;
            }
            let cell = inner.at(r, c);
            if !is_empty(cell) {
                return is_avatar(cell).then_some(cell);
            }
        }
    }

    /// Extracts the corridor view from (row, col) looking along `gaze`.
    ///
    /// Returns the filled matrix and the actual depth, which falls short of
    /// `max_depth` when the corridor runs off the maze. Wall columns outside
    /// the rectangle read as '*'. Depth 0 is the player's own cell.
    pub fn get_view(
        &self,
        row: usize,
        col: usize,
        gaze: Direction,
        max_depth: usize,
    ) -> (View, usize) {
        let inner = self.inner.lock().unwrap();
        let mut view = [[EMPTY; VIEW_WIDTH]; VIEW_DEPTH];

        let (dr, dc) = gaze.delta();
        let (lr, lc) = gaze.turn_left().delta();

        let mut depth = 0;
        for d in 0..max_depth.min(VIEW_DEPTH) {
            let r = row as isize + d as isize * dr;
            let c = col as isize + d as isize * dc;
            if !inner.in_bounds(r, c) {
                break;
            }
            view[d][CORRIDOR] = inner.at(r, c);
            view[d][LEFT_WALL] = inner.at_or_wall(r + lr, c + lc);
            view[d][RIGHT_WALL] = inner.at_or_wall(r - lr, c - lc);
            depth += 1;
        }
        (view, depth)
    }

    /// Renders the grid for debug logging.
    pub fn render(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut out = String::with_capacity((inner.cols + 1) * inner.rows);
        for row in &inner.cells {
            let _ = writeln!(out, "{}", String::from_utf8_lossy(row));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_maze(rows: usize, cols: usize) -> Maze {
        let line = " ".repeat(cols);
        let lines: Vec<String> = (0..rows).map(|_| line.clone()).collect();
        Maze::from_template(&lines).unwrap()
    }

    fn cell(maze: &Maze, row: usize, col: usize) -> u8 {
        maze.inner.lock().unwrap().cells[row][col]
    }

    #[test]
    fn template_dimensions() {
        let maze = Maze::from_template(&["*****", "*   *", "*****"]).unwrap();
        assert_eq!(maze.dimensions(), (3, 5));
    }

    #[test]
    fn template_validation() {
        assert!(matches!(
            Maze::from_template::<&str>(&[]),
            Err(TemplateError::Empty)
        ));
        assert!(matches!(
            Maze::from_template(&["***", "**"]),
            Err(TemplateError::Ragged(1))
        ));
        assert!(matches!(
            Maze::from_template(&["***", "*é*"]),
            Err(TemplateError::NotAscii(1))
        ));
    }

    #[test]
    fn place_rejects_occupied_and_out_of_bounds() {
        let maze = open_maze(4, 4);
        maze.place(b'A', 1, 1).unwrap();
        assert!(matches!(maze.place(b'B', 1, 1), Err(MazeError::Occupied)));
        assert!(matches!(
            maze.place(b'B', 4, 0),
            Err(MazeError::OutOfBounds)
        ));
    }

    #[test]
    fn remove_only_matches_its_avatar() {
        let maze = open_maze(3, 3);
        maze.place(b'A', 0, 0).unwrap();
        maze.remove(b'B', 0, 0);
        assert_eq!(cell(&maze, 0, 0), b'A');
        maze.remove(b'A', 0, 0);
        assert_eq!(cell(&maze, 0, 0), EMPTY);
    }

    #[test]
    fn move_swaps_cells_atomically() {
        let maze = open_maze(3, 3);
        maze.place(b'A', 1, 1).unwrap();
        maze.move_avatar(1, 1, Direction::East).unwrap();
        assert_eq!(cell(&maze, 1, 1), EMPTY);
        assert_eq!(cell(&maze, 1, 2), b'A');
    }

    #[test]
    fn move_blocked_by_walls_and_edges() {
        let maze = Maze::from_template(&["* *", "   "]).unwrap();
        maze.place(b'A', 0, 1).unwrap();
        assert!(maze.move_avatar(0, 1, Direction::West).is_err());
        assert!(maze.move_avatar(0, 1, Direction::North).is_err());
        assert!(maze.move_avatar(1, 0, Direction::East).is_err()); // source empty
        maze.move_avatar(0, 1, Direction::South).unwrap();
        assert_eq!(cell(&maze, 1, 1), b'A');
    }

    #[test]
    fn find_target_hits_first_avatar() {
        let maze = open_maze(1, 6);
        maze.place(b'A', 0, 0).unwrap();
        maze.place(b'B', 0, 3).unwrap();
        maze.place(b'C', 0, 5).unwrap();
        assert_eq!(maze.find_target(0, 0, Direction::East), Some(b'B'));
    }

    #[test]
    fn find_target_stopped_by_wall() {
        let maze = Maze::from_template(&["A *B"]).unwrap();
        assert_eq!(maze.find_target(0, 0, Direction::East), None);
    }

    #[test]
    fn find_target_runs_off_the_maze() {
        let maze = open_maze(2, 2);
        maze.place(b'A', 0, 0).unwrap();
        assert_eq!(maze.find_target(0, 0, Direction::North), None);
        assert_eq!(maze.find_target(0, 0, Direction::East), None);
    }

    #[test]
    fn view_matches_definition() {
        // Player 'A' at (1,1) facing east: corridor runs along row 1,
        // left wall is row 0, right wall is row 2.
        let maze = Maze::from_template(&["#%&*", "A  B", "@$!?"]).unwrap();
        let (view, depth) = maze.get_view(1, 1, Direction::East, VIEW_DEPTH);
        assert_eq!(depth, 3);
        for (d, col) in [(0usize, 1usize), (1, 2), (2, 3)] {
            assert_eq!(view[d][CORRIDOR], cell(&maze, 1, col));
            assert_eq!(view[d][LEFT_WALL], cell(&maze, 0, col));
            assert_eq!(view[d][RIGHT_WALL], cell(&maze, 2, col));
        }
    }

    #[test]
    fn view_pads_out_of_bounds_with_walls() {
        let maze = open_maze(3, 3);
        maze.place(b'A', 0, 1).unwrap();
        // Facing north from the top row: depth 0 only, both side cells
        // exist but the corridor ends immediately after.
        let (view, depth) = maze.get_view(0, 1, Direction::North, VIEW_DEPTH);
        assert_eq!(depth, 1);
        assert_eq!(view[0][CORRIDOR], b'A');
        // Left of a northward gaze is west.
        assert_eq!(view[0][LEFT_WALL], EMPTY);
        assert_eq!(view[0][RIGHT_WALL], EMPTY);

        let maze = open_maze(1, 4);
        maze.place(b'A', 0, 0).unwrap();
        let (view, depth) = maze.get_view(0, 0, Direction::East, VIEW_DEPTH);
        assert_eq!(depth, 4);
        for d in 0..depth {
            assert_eq!(view[d][LEFT_WALL], WALL);
            assert_eq!(view[d][RIGHT_WALL], WALL);
        }
    }

    #[test]
    fn place_random_fills_and_exhausts() {
        let maze = open_maze(2, 2);
        for avatar in [b'A', b'B', b'C', b'D'] {
            let (row, col) = maze.place_random(avatar).unwrap();
            assert_eq!(cell(&maze, row, col), avatar);
        }
        assert!(matches!(
            maze.place_random(b'E'),
            Err(MazeError::Exhausted)
        ));
    }

    #[test]
    fn cell_uniqueness_across_moves() {
        let maze = open_maze(4, 4);
        let (mut row, mut col) = maze.place_random(b'A').unwrap();
        for dir in [
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
        ] {
            if maze.move_avatar(row, col, dir).is_ok() {
                let (dr, dc) = dir.delta();
                row = (row as isize + dr) as usize;
                col = (col as isize + dc) as usize;
            }
            let inner = maze.inner.lock().unwrap();
            let count = inner
                .cells
                .iter()
                .flatten()
                .filter(|&&c| c == b'A')
                .count();
            assert_eq!(count, 1);
            assert_eq!(inner.cells[row][col], b'A');
        }
    }

    #[test]
    fn direction_algebra() {
        assert_eq!(Direction::North.turn_left(), Direction::West);
        assert_eq!(Direction::West.turn_left(), Direction::South);
        assert_eq!(Direction::North.turn_right(), Direction::East);
        assert_eq!(Direction::North.reverse(), Direction::South);
        assert_eq!(Direction::West.reverse(), Direction::East);
        let (dr, dc) = Direction::North.delta();
        let (rr, rc) = Direction::North.reverse().delta();
        assert_eq!((dr + rr, dc + rc), (0, 0));
    }
}
