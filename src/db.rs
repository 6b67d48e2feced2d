use anyhow::Context;
use sqlx::{
    encode::IsNull,
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgPoolOptions, PgTypeInfo, PgValueRef},
    Decode, Encode, PgPool, Postgres, Type, ValueRef,
};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connect to database")
}

/// Timestamp column that is always UTC.
///
/// Reads accept `TIMESTAMPTZ` as well as naive `TIMESTAMP` values; a naive
/// value is taken to be UTC, never local time. Writes always go out as
/// `TIMESTAMPTZ` at offset UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UtcDateTime(pub OffsetDateTime);

impl UtcDateTime {
    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }
}

impl From<OffsetDateTime> for UtcDateTime {
    fn from(dt: OffsetDateTime) -> Self {
        Self(dt.to_offset(UtcOffset::UTC))
    }
}

impl From<PrimitiveDateTime> for UtcDateTime {
    fn from(dt: PrimitiveDateTime) -> Self {
        Self(dt.assume_utc())
    }
}

impl Type<Postgres> for UtcDateTime {
    fn type_info() -> PgTypeInfo {
        <OffsetDateTime as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <OffsetDateTime as Type<Postgres>>::compatible(ty)
            || <PrimitiveDateTime as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for UtcDateTime {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let naive = {
            let ty = value.type_info();
            <PrimitiveDateTime as Type<Postgres>>::compatible(&ty)
        };
        if naive {
            let dt = <PrimitiveDateTime as Decode<Postgres>>::decode(value)?;
            Ok(dt.into())
        } else {
            let dt = <OffsetDateTime as Decode<Postgres>>::decode(value)?;
            Ok(dt.into())
        }
    }
}

impl Encode<'_, Postgres> for UtcDateTime {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        let utc = self.0.to_offset(UtcOffset::UTC);
        <OffsetDateTime as Encode<Postgres>>::encode_by_ref(&utc, buf)
    }
}
