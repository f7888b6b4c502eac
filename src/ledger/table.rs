use crate::ledger::codec::DbCodec;

/// Column family trait for type-safe RocksDB operations.
/// Defines a type-safe column family with codecs for keys and values.
pub trait TypedCf {
    type Key: Clone + std::fmt::Debug;
    type Value: Clone + std::fmt::Debug;
    type KeyCodec: DbCodec<Self::Key>;
    type ValueCodec: DbCodec<Self::Value>;

    /// Column family name - must be unique across the database
    const NAME: &'static str;
}

/// Macro to define a TypedCf with the default JSON value codec and a
/// plain string key
#[macro_export]
macro_rules! define_cf {
    ($name:ident, $value:ty, $cf_name:literal) => {
        pub struct $name;

        impl $crate::ledger::table::TypedCf for $name {
            type Key = String;
            type Value = $value;
            type KeyCodec = $crate::ledger::codec::StringKeyCodec;
            type ValueCodec = $crate::ledger::codec::JsonDbCodec;
            const NAME: &'static str = $cf_name;
        }
    };
}

/// Macro to define a TypedCf with custom key type and codec
#[macro_export]
macro_rules! define_cf_with_key {
    ($name:ident, $key:ty, $key_codec:ty, $value:ty, $cf_name:literal) => {
        pub struct $name;

        impl $crate::ledger::table::TypedCf for $name {
            type Key = $key;
            type Value = $value;
            type KeyCodec = $key_codec;
            type ValueCodec = $crate::ledger::codec::JsonDbCodec;
            const NAME: &'static str = $cf_name;
        }
    };
}
