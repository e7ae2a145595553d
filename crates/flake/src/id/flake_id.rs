use crate::error::{Error, Field, Result};
use core::fmt;

/// A 64-bit clock-free identifier packed from a service id, a container id and
/// a sequence number.
///
/// The sign bit is always zero, so every `FlakeId` is also a non-negative
/// `i64`.
///
/// ```text
///  Bit Index:  63 62          53 52           31 30            0
///              +--+-------------+---------------+---------------+
///  Field:      |0 | service(10) | container(22) | sequence (31) |
///              +--+-------------+---------------+---------------+
///              |<----------- MSB -- 64 bits -- LSB ------------>|
/// ```
///
/// # Example
///
/// ```
/// use flake::FlakeId;
///
/// let id = FlakeId::try_from_components(11, 12, 1).unwrap();
/// assert_eq!(id.service_id(), 11);
/// assert_eq!(id.container_id(), 12);
/// assert_eq!(id.sequence_id(), 1);
/// assert_eq!(FlakeId::try_from_i64(id.to_i64()).unwrap(), id);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FlakeId {
    id: u64,
}

const _: () = {
    // All bits must be accounted for so the sign bit stays reserved.
    assert!(
        FlakeId::RESERVED_BITS
            + FlakeId::SERVICE_BITS
            + FlakeId::CONTAINER_BITS
            + FlakeId::SEQUENCE_BITS
            == u64::BITS,
        "FlakeId layout must cover exactly 64 bits"
    );
};

impl FlakeId {
    pub const RESERVED_BITS: u32 = 1;
    pub const SERVICE_BITS: u32 = 10;
    pub const CONTAINER_BITS: u32 = 22;
    pub const SEQUENCE_BITS: u32 = 31;

    pub const SEQUENCE_SHIFT: u32 = 0;
    pub const CONTAINER_SHIFT: u32 = Self::SEQUENCE_SHIFT + Self::SEQUENCE_BITS;
    pub const SERVICE_SHIFT: u32 = Self::CONTAINER_SHIFT + Self::CONTAINER_BITS;
    pub const RESERVED_SHIFT: u32 = Self::SERVICE_SHIFT + Self::SERVICE_BITS;

    pub const RESERVED_MASK: u64 = (1 << Self::RESERVED_BITS) - 1;
    pub const SERVICE_MASK: u64 = (1 << Self::SERVICE_BITS) - 1;
    pub const CONTAINER_MASK: u64 = (1 << Self::CONTAINER_BITS) - 1;
    pub const SEQUENCE_MASK: u64 = (1 << Self::SEQUENCE_BITS) - 1;

    /// Packs the components without range checks.
    ///
    /// Out-of-range components are a logic error; they trip a debug assertion
    /// and are masked in release builds. Use [`Self::try_from_components`] for
    /// values that did not originate from this crate.
    pub const fn from_components(service_id: u32, container_id: u32, sequence_id: u32) -> Self {
        debug_assert!((service_id as u64) <= Self::SERVICE_MASK, "service id overflow");
        debug_assert!(
            (container_id as u64) <= Self::CONTAINER_MASK,
            "container id overflow"
        );
        debug_assert!(
            (sequence_id as u64) <= Self::SEQUENCE_MASK,
            "sequence id overflow"
        );
        let s = (service_id as u64 & Self::SERVICE_MASK) << Self::SERVICE_SHIFT;
        let c = (container_id as u64 & Self::CONTAINER_MASK) << Self::CONTAINER_SHIFT;
        let q = (sequence_id as u64 & Self::SEQUENCE_MASK) << Self::SEQUENCE_SHIFT;
        Self { id: s | c | q }
    }

    /// Packs the components, rejecting any value that does not fit its field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncodingOverflow`] naming the first offending field.
    pub fn try_from_components(service_id: u32, container_id: u32, sequence_id: u32) -> Result<Self> {
        check(Field::Service, service_id, Self::max_service_id())?;
        check(Field::Container, container_id, Self::max_container_id())?;
        check(Field::Sequence, sequence_id, Self::max_sequence_id())?;
        Ok(Self::from_components(service_id, container_id, sequence_id))
    }

    /// Reinterprets a signed identifier, rejecting negative values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `raw` has the sign bit set.
    pub fn try_from_i64(raw: i64) -> Result<Self> {
        u64::try_from(raw)
            .map(Self::from_raw)
            .map_err(|_| Error::InvalidRequest {
                reason: format!("flake id {raw} is negative"),
            })
    }

    pub const fn service_id(&self) -> u32 {
        ((self.id >> Self::SERVICE_SHIFT) & Self::SERVICE_MASK) as u32
    }

    pub const fn container_id(&self) -> u32 {
        ((self.id >> Self::CONTAINER_SHIFT) & Self::CONTAINER_MASK) as u32
    }

    pub const fn sequence_id(&self) -> u32 {
        ((self.id >> Self::SEQUENCE_SHIFT) & Self::SEQUENCE_MASK) as u32
    }

    /// Returns the maximum representable service id (1023).
    pub const fn max_service_id() -> u32 {
        Self::SERVICE_MASK as u32
    }

    /// Returns the maximum representable container id (2^22 - 1).
    pub const fn max_container_id() -> u32 {
        Self::CONTAINER_MASK as u32
    }

    /// Returns the maximum representable sequence id (2^31 - 1).
    pub const fn max_sequence_id() -> u32 {
        Self::SEQUENCE_MASK as u32
    }

    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Builds an id from its raw representation. The reserved sign bit is
    /// cleared.
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            id: raw & !(Self::RESERVED_MASK << Self::RESERVED_SHIFT),
        }
    }

    pub const fn to_i64(&self) -> i64 {
        self.id as i64
    }
}

fn check(field: Field, value: u32, max: u32) -> Result<()> {
    if value > max {
        return Err(Error::EncodingOverflow {
            field,
            value: u64::from(value),
            max: u64::from(max),
        });
    }
    Ok(())
}

impl From<FlakeId> for i64 {
    fn from(id: FlakeId) -> Self {
        id.to_i64()
    }
}

impl fmt::Display for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlakeId")
            .field("id", &format_args!("{} (0x{:x})", self.id, self.id))
            .field("service_id", &self.service_id())
            .field("container_id", &self.container_id())
            .field("sequence_id", &self.sequence_id())
            .finish()
    }
}
