/// Errors that can occur when building marker boards.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MarkerError {
    /// The id pool holds fewer ids than the board has cells.
    #[error("The board needs {required} marker ids but only {available} are available")]
    InsufficientIds {
        /// Number of cells of the board.
        required: usize,
        /// Number of ids in the pool.
        available: usize,
    },

    /// An id appears twice on the same board.
    #[error("Marker id {0} is used more than once")]
    DuplicateId(u32),

    /// Grid dimensions or cell size are not usable.
    #[error("Invalid board grid: {0}")]
    InvalidGrid(&'static str),

    /// The name does not match a predefined dictionary.
    #[error("Unknown marker dictionary {0:?}")]
    UnknownDictionary(String),
}
