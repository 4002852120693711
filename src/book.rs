use crate::{position::Position, r#move::Move};

/// The boundary the engine sees of an opening book: given a position, suggest a move or nothing.
/// The file format and the selection policy belong entirely to the implementation behind this
/// trait.
pub trait OpeningBook: Send + Sync {
    /// Returns a book move for the position, or `None` when the position is out of book.
    fn probe(&self, position: &Position) -> Option<Move>;
}

/// A book that knows no positions. Used when no book file is configured or the file cannot be
/// read.
pub struct NullBook;

impl OpeningBook for NullBook {
    fn probe(&self, _position: &Position) -> Option<Move> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctor::ctor;

    #[ctor]
    fn setup() {
        crate::initialize();
    }

    #[test]
    fn test_null_book_is_always_out_of_book() {
        let book = NullBook;
        assert_eq!(book.probe(&Position::new()), None);
    }
}
