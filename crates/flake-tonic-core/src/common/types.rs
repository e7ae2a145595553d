//! Conversions between the wire form of a range and [`SegmentRange`].
//!
//! The protocol carries every component as `int32`. Allocator output always
//! fits, since each [`FlakeId`] field is at most 31 bits wide. Client input is
//! untrusted: negative components and inverted bounds are rejected.
//!
//! [`FlakeId`]: flake::FlakeId

use crate::proto::{FetchReply, UuidRange};
use flake::{Error, Field, SegmentRange};

/// Default listen address of the allocator server.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:30001";

/// Default endpoint clients connect to.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:30001";

fn to_wire(field: Field, value: u32) -> Result<i32, Error> {
    i32::try_from(value).map_err(|_| Error::EncodingOverflow {
        field,
        value: u64::from(value),
        max: i32::MAX as u64,
    })
}

fn from_wire(what: &str, value: i32) -> Result<u32, Error> {
    u32::try_from(value).map_err(|_| Error::Rpc {
        context: format!("malformed range: negative {what} {value}"),
    })
}

impl TryFrom<SegmentRange> for UuidRange {
    type Error = Error;

    fn try_from(range: SegmentRange) -> Result<Self, Self::Error> {
        Ok(Self {
            service_id: to_wire(Field::Service, range.service_id)?,
            container_id: to_wire(Field::Container, range.container_id)?,
            sequence_id_start: to_wire(Field::Sequence, range.start)?,
            sequence_id_end: to_wire(Field::Sequence, range.end)?,
        })
    }
}

impl TryFrom<UuidRange> for SegmentRange {
    type Error = Error;

    fn try_from(item: UuidRange) -> Result<Self, Self::Error> {
        let range = Self {
            service_id: from_wire("service id", item.service_id)?,
            container_id: from_wire("container id", item.container_id)?,
            start: from_wire("sequence start", item.sequence_id_start)?,
            end: from_wire("sequence end", item.sequence_id_end)?,
        };
        if range.is_empty() {
            return Err(Error::Rpc {
                context: format!(
                    "malformed range: start {} is past end {}",
                    range.start, range.end
                ),
            });
        }
        Ok(range)
    }
}

impl FetchReply {
    /// Builds a reply from allocator output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncodingOverflow`] if a component does not fit in
    /// `int32`.
    pub fn from_ranges(ranges: &[SegmentRange]) -> Result<Self, Error> {
        let items = ranges
            .iter()
            .copied()
            .map(UuidRange::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Self { items })
    }

    /// Validates and converts every item, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] on the first malformed item.
    pub fn into_ranges(self) -> Result<Vec<SegmentRange>, Error> {
        self.items.into_iter().map(SegmentRange::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(start: i32, end: i32) -> UuidRange {
        UuidRange {
            service_id: 11,
            container_id: 12,
            sequence_id_start: start,
            sequence_id_end: end,
        }
    }

    #[test]
    fn reply_preserves_order() {
        let ranges = [
            SegmentRange {
                service_id: 11,
                container_id: 12,
                start: 1001,
                end: 1024,
            },
            SegmentRange {
                service_id: 11,
                container_id: 13,
                start: 1,
                end: 976,
            },
        ];
        let reply = FetchReply::from_ranges(&ranges).unwrap();
        assert_eq!(reply.items[1].container_id, 13);
        assert_eq!(reply.into_ranges().unwrap(), ranges);
    }

    #[test]
    fn rejects_negative_components() {
        let mut bad = item(1, 5);
        bad.container_id = -1;
        assert!(matches!(
            SegmentRange::try_from(bad),
            Err(Error::Rpc { .. })
        ));
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(matches!(
            SegmentRange::try_from(item(6, 5)),
            Err(Error::Rpc { .. })
        ));
        assert!(SegmentRange::try_from(item(5, 5)).is_ok());
    }

    #[test]
    fn rejects_components_wider_than_int32() {
        let range = SegmentRange {
            service_id: 1,
            container_id: 1,
            start: 1,
            end: u32::MAX,
        };
        assert!(matches!(
            UuidRange::try_from(range),
            Err(Error::EncodingOverflow {
                field: Field::Sequence,
                ..
            })
        ));
    }
}
