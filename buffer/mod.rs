// Buffer module: fixed-capacity byte ring used to coalesce small TCP writes
pub mod ring;

pub use ring::*;
