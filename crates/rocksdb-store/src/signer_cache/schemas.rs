use causeway_db::types::SignerCacheEntry;
use causeway_primitives::buf::Buf32;

use crate::{define_table_with_default_codec, define_table_without_codec, impl_borsh_value_codec};

define_table_with_default_codec!(
    /// A table to store completed signing cycles keyed by payment fingerprint
    (SignerCacheSchema) Buf32 => SignerCacheEntry
);
