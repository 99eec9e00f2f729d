//! Byte stream to block list mapping.
//!
//! The first `size` bytes of the concatenated blocks are the content; any
//! bytes past `size` are dead. An append keeps every leading block that is
//! completely inside the content and re-chunks whatever partial block
//! follows together with the new bytes.

use cowfs_block::BLOCK_SIZE;

/// How an append reuses the previous version's block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendPlan {
    /// Leading blocks reused verbatim by identifier
    pub reused: usize,
    /// Live bytes taken from block `reused` into the new tail
    pub carry: usize,
}

impl AppendPlan {
    /// Whether the block at index `reused` contributes bytes to the tail.
    pub fn has_carry(&self) -> bool {
        self.carry > 0
    }
}

/// Plan an append onto a version with `block_count` blocks holding `size` bytes.
pub fn plan_append(block_count: usize, size: u64) -> AppendPlan {
    let block = BLOCK_SIZE as u64;
    let full = (size / block).min(block_count as u64) as usize;
    let carry = if full < block_count {
        (size - full as u64 * block) as usize
    } else {
        0
    };
    AppendPlan {
        reused: full,
        carry,
    }
}

/// Split bytes into block-sized pieces; only the last may be short.
pub fn pieces(data: &[u8]) -> std::slice::Chunks<'_, u8> {
    data.chunks(BLOCK_SIZE)
}

/// Number of blocks needed to hold `len` bytes.
pub fn blocks_for(len: u64) -> usize {
    len.div_ceil(BLOCK_SIZE as u64) as usize
}
