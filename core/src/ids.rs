use serde::{Deserialize, Serialize};
use sqlx::{Database, Decode, Encode, Type};
use std::{fmt, str::FromStr};

/// Declares a numeric id newtype. `$inner` is the domain representation,
/// `$stored` the integer column type the value is persisted as.
macro_rules! define_id_type {
    ($name:ident, $inner:ty, $stored:ty) => {
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<$inner>().map(Self)
            }
        }

        impl<DB> Type<DB> for $name
        where
            DB: Database,
            $stored: Type<DB>,
        {
            fn type_info() -> DB::TypeInfo {
                <$stored as Type<DB>>::type_info()
            }

            fn compatible(ty: &DB::TypeInfo) -> bool {
                <$stored as Type<DB>>::compatible(ty)
            }
        }

        impl<'q, DB> Encode<'q, DB> for $name
        where
            DB: Database,
            $stored: Encode<'q, DB>,
        {
            fn encode_by_ref(
                &self,
                buf: &mut <DB as Database>::ArgumentBuffer<'q>,
            ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                let stored = <$stored>::try_from(self.0)?;
                stored.encode_by_ref(buf)
            }
        }

        impl<'r, DB> Decode<'r, DB> for $name
        where
            DB: Database,
            $stored: Decode<'r, DB>,
        {
            fn decode(
                value: <DB as Database>::ValueRef<'r>,
            ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
                let stored = <$stored as Decode<DB>>::decode(value)?;
                Ok(Self(<$inner>::try_from(stored)?))
            }
        }
    };
}

define_id_type!(DocumentId, u64, i64);
define_id_type!(TemplateId, u64, i64);
define_id_type!(GrantId, u64, i64);
define_id_type!(UserId, i32, i32);
