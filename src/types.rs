//! Core identifier types for the image library.

use uuid::Uuid;

/// TagId: interned string id, assigned from 1 in log order
pub type TagId = u32;

/// PathId: interned directory path id, assigned from 1 in log order
pub type PathId = u32;

/// BinaryId: identity of one stored file
pub type BinaryId = Uuid;

/// BlockId: identity of one data block
pub type BlockId = Uuid;

/// Terminator of a data block chain
pub const NIL_BLOCK: BlockId = Uuid::nil();
