pub mod board;

pub use board::{role, Board, Display, Led};
