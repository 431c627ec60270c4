//! Wire envelope: the fixed-layout frame sequence wrapping serialized
//! request/response payloads.
//!
//! Layout, offset by a caller-supplied `prefix_size` (reserved routing
//! frames, opaque here):
//!
//! ```text
//! [prefix..] [empty] [create_time] [id] [request_timeout] [service_msg] [empty] [data..]
//! ```
//!
//! `create_time` and `request_timeout` are MessagePack floats (epoch
//! seconds, the timeout is an absolute deadline), `service_msg` a
//! MessagePack boolean. The minimum total length is `7 + prefix_size`.

use thiserror::Error;

use crate::error::CommunicationError;

use super::codec::{self, CodecError};

const EMPTY_1: usize = 0;
const CREATE_TIME: usize = 1;
const ID: usize = 2;
const REQUEST_TIMEOUT: usize = 3;
const SERVICE_MSG: usize = 4;
const EMPTY_2: usize = 5;
const DATA: usize = 6;
const MIN_SIZE: usize = 7;

/// One violation per variant so a reject can be reported precisely.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope has {len} frames, minimum is {min}")]
    TooShort { len: usize, min: usize },

    #[error("separator frame at slot {slot} is not empty")]
    SeparatorNotEmpty { slot: usize },

    #[error("envelope is missing the create-time frame")]
    MissingCreateTime,

    #[error("envelope is missing the id frame")]
    MissingId,

    #[error("envelope is missing the request-timeout frame")]
    MissingTimeout,

    #[error("envelope is missing the service-message frame")]
    MissingServiceMsg,

    #[error("envelope carries no data frames")]
    MissingData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    frames: Vec<Vec<u8>>,
    prefix_size: usize,
}

impl Envelope {
    /// Wrap an already-laid-out frame sequence. Call [`Envelope::validate`]
    /// before trusting accessor positions on inbound data.
    pub fn new(frames: Vec<Vec<u8>>, prefix_size: usize) -> Self {
        Self { frames, prefix_size }
    }

    /// Assemble an envelope from raw field frames. An empty
    /// `request_timeout` means "no deadline"; `service_msg` defaults to the
    /// canonical MessagePack `false`.
    pub fn from_parts(
        create_time: Vec<u8>,
        id: Vec<u8>,
        data: Vec<Vec<u8>>,
        request_timeout: Vec<u8>,
        service_msg: Option<Vec<u8>>,
        prefix: Vec<Vec<u8>>,
    ) -> Self {
        let prefix_size = prefix.len();
        let mut frames = prefix;
        frames.push(Vec::new());
        frames.push(create_time);
        frames.push(id);
        frames.push(request_timeout);
        frames.push(service_msg.unwrap_or_else(|| vec![0xc2]));
        frames.push(Vec::new());
        frames.extend(data);
        Self { frames, prefix_size }
    }

    /// Assemble an outbound envelope, encoding the scalar fields.
    pub fn for_message(
        create_time: f64,
        id: &[u8],
        deadline: f64,
        service_msg: bool,
        data: Vec<Vec<u8>>,
        prefix: Vec<Vec<u8>>,
    ) -> Result<Self, CodecError> {
        Ok(Self::from_parts(
            codec::pack_scalar(&create_time)?,
            id.to_vec(),
            data,
            codec::pack_scalar(&deadline)?,
            Some(codec::pack_scalar(&service_msg)?),
            prefix,
        ))
    }

    pub fn prefix(&self) -> &[Vec<u8>] {
        &self.frames[..self.prefix_size.min(self.frames.len())]
    }

    pub fn prefix_size(&self) -> usize {
        self.prefix_size
    }

    /// Missing slots read as empty frames, so accessors on a short inbound
    /// sequence report "absent" instead of panicking.
    fn field(&self, slot: usize) -> &[u8] {
        self.frames
            .get(self.prefix_size + slot)
            .map_or(&[][..], Vec::as_slice)
    }

    pub fn create_time_raw(&self) -> &[u8] {
        self.field(CREATE_TIME)
    }

    /// Create time as epoch seconds; `None` if the frame does not decode to
    /// a number.
    pub fn create_time(&self) -> Option<f64> {
        codec::frame_f64(self.create_time_raw())
    }

    pub fn id(&self) -> &[u8] {
        self.field(ID)
    }

    pub fn request_timeout_raw(&self) -> &[u8] {
        self.field(REQUEST_TIMEOUT)
    }

    /// Absolute deadline in epoch seconds; `None` if absent or not numeric.
    pub fn request_timeout(&self) -> Option<f64> {
        codec::frame_f64(self.request_timeout_raw())
    }

    pub fn service_msg_raw(&self) -> &[u8] {
        self.field(SERVICE_MSG)
    }

    /// Service flag; `None` if the frame does not decode.
    pub fn service_msg(&self) -> Option<bool> {
        codec::frame_bool(self.service_msg_raw())
    }

    pub fn data(&self) -> &[Vec<u8>] {
        self.frames
            .get(self.prefix_size + DATA..)
            .unwrap_or(&[])
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Vec<u8>> {
        self.frames
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        let min = MIN_SIZE + self.prefix_size;
        if self.frames.len() < min {
            return Err(EnvelopeError::TooShort {
                len: self.frames.len(),
                min,
            });
        }
        for slot in [EMPTY_1, EMPTY_2] {
            if !self.field(slot).is_empty() {
                return Err(EnvelopeError::SeparatorNotEmpty {
                    slot: self.prefix_size + slot,
                });
            }
        }
        if self.field(CREATE_TIME).is_empty() {
            return Err(EnvelopeError::MissingCreateTime);
        }
        if self.field(ID).is_empty() {
            return Err(EnvelopeError::MissingId);
        }
        if self.field(REQUEST_TIMEOUT).is_empty() {
            return Err(EnvelopeError::MissingTimeout);
        }
        if self.field(SERVICE_MSG).is_empty() {
            return Err(EnvelopeError::MissingServiceMsg);
        }
        if self.data().is_empty() || self.data().iter().all(Vec::is_empty) {
            return Err(EnvelopeError::MissingData);
        }
        Ok(())
    }

    /// Seconds until this envelope's deadline, floored at zero. Fails with a
    /// Timeout-class error when the deadline frame is absent or undecodable.
    pub fn time_to_expire(&self, now: f64) -> Result<f64, CommunicationError> {
        let deadline = self.request_timeout().ok_or_else(|| {
            CommunicationError::timeout("the received message has no timeout value")
        })?;
        Ok((deadline - now).max(0.0))
    }

    pub fn is_expired(&self, now: f64) -> Result<bool, CommunicationError> {
        Ok(self.time_to_expire(now)? <= 0.0)
    }
}

/// Freshness gate of a communication endpoint: resolves how long an inbound
/// envelope may still be worked on, optionally falling back to a configured
/// default when the envelope carries no deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub default_timeout: f64,
}

impl TimeoutPolicy {
    pub fn new(default_timeout: f64) -> Self {
        Self { default_timeout }
    }

    /// Remaining processing time for `envelope` at `now`.
    ///
    /// Errors with Timeout when the envelope is already outdated, or when it
    /// carries no deadline and `use_default` is false.
    pub fn remaining(
        &self,
        envelope: &Envelope,
        now: f64,
        use_default: bool,
    ) -> Result<f64, CommunicationError> {
        let remaining = match envelope.time_to_expire(now) {
            Ok(t) => t,
            Err(err) => {
                if !use_default {
                    return Err(err);
                }
                tracing::debug!(default = self.default_timeout, "envelope has no deadline, default applied");
                self.default_timeout
            }
        };
        if remaining <= 0.0 {
            return Err(CommunicationError::timeout(format!(
                "the received message is already outdated, remaining: {remaining}"
            )));
        }
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::codec::pack_scalar;

    fn well_formed(deadline_frame: Vec<u8>, prefix: Vec<Vec<u8>>) -> Envelope {
        Envelope::from_parts(
            pack_scalar(&100.0f64).unwrap(),
            b"msg-1".to_vec(),
            vec![b"payload".to_vec()],
            deadline_frame,
            None,
            prefix,
        )
    }

    #[test]
    fn layout_and_accessors() {
        let env = well_formed(pack_scalar(&130.0f64).unwrap(), vec![b"route".to_vec()]);
        assert_eq!(env.prefix(), [b"route".to_vec()]);
        assert_eq!(env.create_time(), Some(100.0));
        assert_eq!(env.id(), b"msg-1");
        assert_eq!(env.request_timeout(), Some(130.0));
        assert_eq!(env.service_msg(), Some(false));
        assert_eq!(env.data(), [b"payload".to_vec()]);
        assert!(env.validate().is_ok());
    }

    #[test]
    fn too_short_is_rejected() {
        let env = Envelope::new(vec![Vec::new(); 6], 0);
        assert_eq!(
            env.validate(),
            Err(EnvelopeError::TooShort { len: 6, min: 7 })
        );
        // prefix raises the minimum
        let env = Envelope::new(vec![Vec::new(); 7], 1);
        assert_eq!(
            env.validate(),
            Err(EnvelopeError::TooShort { len: 7, min: 8 })
        );
    }

    #[test]
    fn dirty_separator_is_rejected() {
        let mut env = well_formed(pack_scalar(&130.0f64).unwrap(), vec![]);
        let mut frames = env.clone().into_frames();
        frames[0] = b"dirt".to_vec();
        env = Envelope::new(frames, 0);
        assert_eq!(
            env.validate(),
            Err(EnvelopeError::SeparatorNotEmpty { slot: 0 })
        );
    }

    #[test]
    fn each_missing_field_has_its_own_error() {
        let base = well_formed(pack_scalar(&130.0f64).unwrap(), vec![]);

        let cases: [(usize, EnvelopeError); 4] = [
            (1, EnvelopeError::MissingCreateTime),
            (2, EnvelopeError::MissingId),
            (3, EnvelopeError::MissingTimeout),
            (4, EnvelopeError::MissingServiceMsg),
        ];
        for (slot, expected) in cases {
            let mut frames = base.clone().into_frames();
            frames[slot] = Vec::new();
            assert_eq!(Envelope::new(frames, 0).validate(), Err(expected));
        }

        let mut frames = base.clone().into_frames();
        frames.truncate(6);
        frames.push(Vec::new()); // data slot present but empty
        assert_eq!(
            Envelope::new(frames, 0).validate(),
            Err(EnvelopeError::MissingData)
        );
    }

    #[test]
    fn short_inbound_sequence_reads_as_absent() {
        let env = Envelope::new(vec![b"only".to_vec(), Vec::new()], 0);
        assert!(env.validate().is_err());
        assert_eq!(env.create_time(), None);
        assert_eq!(env.request_timeout(), None);
        assert!(env.id().is_empty());
        assert!(env.data().is_empty());
        // no deadline frame resolves to a timeout error, not a panic
        assert!(env.time_to_expire(1_000.0).unwrap_err().is_timeout());
    }

    #[test]
    fn expiry_against_a_future_deadline() {
        let now = 1_000.0;
        let env = well_formed(pack_scalar(&(now + 1.0)).unwrap(), vec![]);
        let remaining = env.time_to_expire(now).unwrap();
        assert!(remaining > 0.0 && remaining <= 1.0);
        assert!(!env.is_expired(now).unwrap());
    }

    #[test]
    fn expiry_against_a_past_deadline_floors_at_zero() {
        let now = 1_000.0;
        let env = well_formed(pack_scalar(&(now - 1.0)).unwrap(), vec![]);
        assert_eq!(env.time_to_expire(now).unwrap(), 0.0);
        assert!(env.is_expired(now).unwrap());
    }

    #[test]
    fn absent_deadline_is_a_timeout_error() {
        let env = well_formed(Vec::new(), vec![]);
        let err = env.time_to_expire(1_000.0).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn policy_falls_back_to_the_default_only_when_asked() {
        let policy = TimeoutPolicy::new(30.0);
        let now = 1_000.0;

        let fresh = well_formed(pack_scalar(&(now + 1.0)).unwrap(), vec![]);
        let remaining = policy.remaining(&fresh, now, false).unwrap();
        assert!(remaining > 0.0 && remaining <= 1.0);

        let stale = well_formed(pack_scalar(&(now - 1.0)).unwrap(), vec![]);
        assert!(policy.remaining(&stale, now, true).unwrap_err().is_timeout());

        let no_deadline = well_formed(Vec::new(), vec![]);
        assert!(policy.remaining(&no_deadline, now, false).is_err());
        assert_eq!(policy.remaining(&no_deadline, now, true).unwrap(), 30.0);
    }
}
