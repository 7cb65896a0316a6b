//! Toroidal grid geometry

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// One grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Raw `{x, y}` vector as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vector {
    pub x: i32,
    pub y: i32,
}

/// One of the four unit headings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vector", into = "Vector")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Right, Self::Down, Self::Left];

    pub fn vector(self) -> Vector {
        match self {
            Self::Up => Vector { x: 0, y: -1 },
            Self::Down => Vector { x: 0, y: 1 },
            Self::Left => Vector { x: -1, y: 0 },
            Self::Right => Vector { x: 1, y: 0 },
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn is_reverse_of(self, other: Direction) -> bool {
        self.opposite() == other
    }

    /// Arrow keys and WASD (either case)
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ArrowUp" | "w" | "W" => Some(Self::Up),
            "ArrowDown" | "s" | "S" => Some(Self::Down),
            "ArrowLeft" | "a" | "A" => Some(Self::Left),
            "ArrowRight" | "d" | "D" => Some(Self::Right),
            _ => None,
        }
    }
}

impl TryFrom<Vector> for Direction {
    type Error = ProtocolError;

    fn try_from(v: Vector) -> Result<Self, Self::Error> {
        match (v.x, v.y) {
            (0, -1) => Ok(Self::Up),
            (0, 1) => Ok(Self::Down),
            (-1, 0) => Ok(Self::Left),
            (1, 0) => Ok(Self::Right),
            (x, y) => Err(ProtocolError::InvalidDirection { x, y }),
        }
    }
}

impl From<Direction> for Vector {
    fn from(dir: Direction) -> Self {
        dir.vector()
    }
}

/// Board dimensions; both axes wrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub width: i32,
    pub height: i32,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn cell_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn wrap(&self, cell: Cell) -> Cell {
        Cell {
            x: cell.x.rem_euclid(self.width),
            y: cell.y.rem_euclid(self.height),
        }
    }

    /// Neighbour of `cell` in `dir`, wrapping at the edges
    pub fn step(&self, cell: Cell, dir: Direction) -> Cell {
        let v = dir.vector();
        self.wrap(Cell::new(cell.x + v.x, cell.y + v.y))
    }

    /// Heading that leads from `from` to the adjacent `to`, if any
    pub fn direction_between(&self, from: Cell, to: Cell) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|&dir| self.step(from, dir) == to)
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| Cell::new(x, y)))
    }
}
