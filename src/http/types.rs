use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// A `timestamptz` column that serializes as an RFC 3339 string.
///
/// `OffsetDateTime`'s own `Serialize` impl produces an array of integers, which is no use to an
/// API client.
#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(transparent)]
pub struct Timestamptz(pub OffsetDateTime);

impl Serialize for Timestamptz {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = self
            .0
            .format(&Rfc3339)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn serializes_as_rfc3339() {
        let ts = Timestamptz(datetime!(2026-10-19 12:30:00 UTC));
        assert_eq!(
            serde_json::to_string(&ts).unwrap(),
            r#""2026-10-19T12:30:00Z""#
        );
    }
}
