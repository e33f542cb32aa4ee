//! Replica health classification

/// Health of a replica endpoint as seen by this client.
///
/// Ordered best to worst; selection buckets follow this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReplicaHealthState {
    Connected = 0,
    Unknown = 1,
    UnhealthyPending = 2,
    Unhealthy = 3,
}

impl ReplicaHealthState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ReplicaHealthState::Connected,
            1 => ReplicaHealthState::Unknown,
            2 => ReplicaHealthState::UnhealthyPending,
            _ => ReplicaHealthState::Unhealthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaHealthState::Connected => "connected",
            ReplicaHealthState::Unknown => "unknown",
            ReplicaHealthState::UnhealthyPending => "unhealthy_pending",
            ReplicaHealthState::Unhealthy => "unhealthy",
        }
    }

    /// Selection bucket with validation on: one bucket per state.
    pub fn validated_bucket(&self) -> usize {
        *self as usize
    }

    /// Selection bucket with validation off: everything but `Unhealthy`
    /// shares the first bucket.
    pub fn coarse_bucket(&self) -> usize {
        match self {
            ReplicaHealthState::Unhealthy => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_u8() {
        for state in [
            ReplicaHealthState::Connected,
            ReplicaHealthState::Unknown,
            ReplicaHealthState::UnhealthyPending,
            ReplicaHealthState::Unhealthy,
        ] {
            assert_eq!(ReplicaHealthState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_buckets() {
        assert_eq!(ReplicaHealthState::UnhealthyPending.coarse_bucket(), 0);
        assert_eq!(ReplicaHealthState::Unhealthy.coarse_bucket(), 1);
        assert_eq!(ReplicaHealthState::UnhealthyPending.validated_bucket(), 2);
        assert!(ReplicaHealthState::Connected < ReplicaHealthState::Unhealthy);
    }
}
