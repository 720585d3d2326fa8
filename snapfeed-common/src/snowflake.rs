//! Time-ordered 64-bit identifiers.
//!
//! Layout, most significant bit first: 42 bits of milliseconds since the
//! epoch, 10 bits of worker id, 12 bits of per-worker sequence.

use derive_where::derive_where;
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

pub const TIMESTAMP_BITS: u32 = 42;
pub const WORKER_ID_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

const WORKER_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;

const TIMESTAMP_MAX: u64 = (1 << TIMESTAMP_BITS) - 1;
const WORKER_ID_MAX: u16 = (1 << WORKER_ID_BITS) - 1;
const SEQUENCE_MAX: u16 = (1 << SEQUENCE_BITS) - 1;

pub trait Epoch {
    const EPOCH_TIME: OffsetDateTime;
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum SnowflakeError {
    #[error("Specified time was before the snowflake epoch.")]
    TimeBeforeEpoch,
    #[error("Resulting timestamp uses too many bits.")]
    TimestampTooLarge,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Worker id {0} does not fit into {WORKER_ID_BITS} bits")]
pub struct WorkerIdOutOfRangeError(u16);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct WorkerId(u16);

impl WorkerId {
    #[must_use]
    pub fn new(id: u16) -> Option<Self> {
        (id <= WORKER_ID_MAX).then_some(Self(id))
    }

    #[must_use]
    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for WorkerId {
    type Error = WorkerIdOutOfRangeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(WorkerIdOutOfRangeError(value))
    }
}

#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct Snowflake<SnowflakeEpoch>(u64, PhantomData<SnowflakeEpoch>);

impl<SnowflakeEpoch> Snowflake<SnowflakeEpoch> {
    #[must_use]
    pub fn new(inner: u64) -> Self {
        Self(inner, PhantomData)
    }

    /// Parts out of range are truncated to their bit width.
    #[must_use]
    pub fn from_parts(millis: u64, worker_id: WorkerId, sequence: u16) -> Self {
        let snowflake = (millis & TIMESTAMP_MAX) << TIMESTAMP_SHIFT
            | u64::from(worker_id.get()) << WORKER_ID_SHIFT
            | u64::from(sequence & SEQUENCE_MAX);

        Self::new(snowflake)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub fn millis(self) -> u64 {
        self.0 >> TIMESTAMP_SHIFT
    }

    #[must_use]
    pub fn worker_id(self) -> WorkerId {
        #[allow(clippy::cast_possible_truncation)]
        let worker_id = ((self.0 >> WORKER_ID_SHIFT) & u64::from(WORKER_ID_MAX)) as u16;
        WorkerId(worker_id)
    }

    #[must_use]
    pub fn sequence(self) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let sequence = (self.0 & u64::from(SEQUENCE_MAX)) as u16;
        sequence
    }

    #[must_use]
    pub fn created_at(self) -> OffsetDateTime
    where
        SnowflakeEpoch: Epoch,
    {
        #[allow(clippy::cast_possible_wrap)]
        let millis = self.millis() as i64;
        SnowflakeEpoch::EPOCH_TIME + Duration::milliseconds(millis)
    }
}

impl<SnowflakeEpoch> Display for Snowflake<SnowflakeEpoch> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<SnowflakeEpoch> From<u64> for Snowflake<SnowflakeEpoch> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<SnowflakeEpoch> From<Snowflake<SnowflakeEpoch>> for u64 {
    fn from(value: Snowflake<SnowflakeEpoch>) -> Self {
        value.get()
    }
}

pub fn millis_since_epoch<SnowflakeEpoch: Epoch>(
    time: OffsetDateTime,
) -> Result<u64, SnowflakeError> {
    let millis = (time - SnowflakeEpoch::EPOCH_TIME).whole_milliseconds();
    if millis < 0 {
        return Err(SnowflakeError::TimeBeforeEpoch);
    }

    u64::try_from(millis)
        .ok()
        .filter(|millis| *millis <= TIMESTAMP_MAX)
        .ok_or(SnowflakeError::TimestampTooLarge)
}

/// Hands out strictly increasing snowflakes for one worker.
///
/// When the clock goes backwards or a millisecond's sequence space runs out,
/// the generator keeps counting from the last timestamp it used instead of
/// repeating ids.
#[derive_where(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct SnowflakeGenerator<SnowflakeEpoch> {
    worker_id: WorkerId,
    last_millis: Option<u64>,
    sequence: u16,
    phantom_data: PhantomData<SnowflakeEpoch>,
}

impl<SnowflakeEpoch> SnowflakeGenerator<SnowflakeEpoch> {
    #[must_use]
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            last_millis: None,
            sequence: 0,
            phantom_data: PhantomData,
        }
    }

    pub fn generate_at(
        &mut self,
        time: OffsetDateTime,
    ) -> Result<Snowflake<SnowflakeEpoch>, SnowflakeError>
    where
        SnowflakeEpoch: Epoch,
    {
        let now = millis_since_epoch::<SnowflakeEpoch>(time)?;

        let (millis, sequence) = match self.last_millis {
            Some(last) if now <= last && self.sequence < SEQUENCE_MAX => (last, self.sequence + 1),
            Some(last) if now <= last => (last + 1, 0),
            _ => (now, 0),
        };
        if millis > TIMESTAMP_MAX {
            return Err(SnowflakeError::TimestampTooLarge);
        }

        self.last_millis = Some(millis);
        self.sequence = sequence;

        Ok(Snowflake::from_parts(millis, self.worker_id, sequence))
    }

    pub fn generate(&mut self) -> Result<Snowflake<SnowflakeEpoch>, SnowflakeError>
    where
        SnowflakeEpoch: Epoch,
    {
        self.generate_at(OffsetDateTime::now_utc())
    }
}
