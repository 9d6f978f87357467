use causeway_db::types::BlockMeta;

use crate::{
    define_table_with_seek_key_codec, define_table_without_codec, impl_borsh_value_codec,
};

define_table_with_seek_key_codec!(
    /// A table to store per-height block metadata, iterable in height order
    (BlockMetaSchema) u64 => BlockMeta
);
