
//! One unit of transfer work: a single band within a single block column.

use super::cursor::Cursor;


/// Tracks the progress of one (block column, band) pair through the rows
/// of a request. Four cursors follow the same row: the position inside the
/// current block, inside the shared raw transfer buffer, inside the
/// unpacked accumulation buffer, and inside the caller's band buffer.
#[derive(Debug, Clone, Default)]
pub(crate) struct BlockTransfer {

    /// Index of this band within the requested band subset,
    /// which is also the index of the caller's buffer.
    pub band_position: usize,

    /// The band's index within the file.
    pub source_band: usize,

    /// The block currently being worked.
    pub number: usize,

    /// Rows left before the next block boundary. At zero, the current row
    /// is the last row of the block.
    pub rows_until: usize,

    /// Byte offset within the current block.
    pub block: Cursor,

    /// Byte offset within the shared raw transfer buffer.
    pub raw: Cursor,

    /// Byte offset within the unpacked accumulation buffer.
    pub unpacked: Cursor,

    /// Byte offset within the caller's band buffer.
    pub user: Cursor,

    /// Pixels per row in this block column, at full resolution.
    pub count_fr: usize,

    /// Pixels per window row delivered from this block column,
    /// at output resolution.
    pub count_dr: usize,

    /// Physical bytes moved per row.
    pub read_bytes: usize,

    /// Pad bytes written after the data of every row; nonzero only on the
    /// last block column of a written image whose padded extent exceeds
    /// its true extent.
    pub pad_col_bytes: usize,

    /// Entirely padded rows below the written image; nonzero only when the
    /// padded extent exceeds the true extent.
    pub pad_rows: usize,

    /// Full-resolution columns carried into this column from the previous
    /// one, completing a sample window split across the block boundary.
    pub residual: usize,

    /// Full-resolution columns left over after the last complete sample
    /// window of this column, carried to the next column.
    pub my_residual: usize,

    /// Valid columns of the trailing sample window, where that window
    /// extends past the true image edge.
    pub cols_in_last_window: usize,

    /// Whether this unit performs the physical transfer. Pixel-interleaved
    /// columns read through their first unit and write through their last;
    /// the other units only unpack or pack.
    pub do_io: bool,

    /// Index of the write-back block buffer this unit fills, if any.
    pub write_block: Option<usize>,

    /// Whether this unit flushes the write-back buffer once the block
    /// completes.
    pub flushes_write_block: bool,

    /// Accumulation buffer bytes per row. Depends on the column's input
    /// width, so it lives on the unit rather than on the shared movement.
    pub unpacked_increment: usize,
}


/// Per-row cursor movement, fixed for the lifetime of a plan.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RowMovement {

    /// Block-number stride at a block boundary: one block row down.
    pub block_stride: usize,

    pub rows_per_block: usize,

    /// Intra-block bytes per row.
    pub block_increment: usize,

    /// Raw transfer buffer bytes per row.
    pub raw_increment: usize,

    /// Caller buffer bytes per row.
    pub user_increment: usize,
}

impl BlockTransfer {

    /// Advance to the next image row. Crossing a block boundary jumps the
    /// block number one block row down and snaps the block cursor back to
    /// its origin; within a block, only the cursors move.
    /// The user cursor is suppressed while a down-sample neighborhood is
    /// still accumulating rows.
    pub fn next_row(&mut self, movement: &RowMovement, advance_user: bool) {
        if self.rows_until == 0 {
            self.number += movement.block_stride;
            self.block.reset();
            self.rows_until = movement.rows_per_block - 1;
        }
        else {
            self.rows_until -= 1;
            self.block.advance(movement.block_increment);
        }

        self.raw.advance(movement.raw_increment);
        self.unpacked.advance(self.unpacked_increment);

        if advance_user {
            self.user.advance(movement.user_increment);
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn row_advance_crosses_blocks(){
        let mut unit = BlockTransfer {
            number: 3,
            rows_until: 1,
            block: Cursor::new_offset(8, 64),
            ..Default::default()
        };

        let movement = RowMovement {
            block_stride: 4,
            rows_per_block: 8,
            block_increment: 32,
            user_increment: 16,
            ..Default::default()
        };

        // one row left in this block: cursors advance
        unit.next_row(&movement, true);
        assert_eq!(unit.number, 3);
        assert_eq!(unit.rows_until, 0);
        assert_eq!(unit.block.mark, 104);
        assert_eq!(unit.user.mark, 16);

        // boundary: next block row, cursor back to origin
        unit.next_row(&movement, false);
        assert_eq!(unit.number, 7);
        assert_eq!(unit.rows_until, 7);
        assert_eq!(unit.block.mark, 8);
        assert_eq!(unit.user.mark, 16);
    }
}
