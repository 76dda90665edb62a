use crate::packet::Packet;
use thiserror::Error;

/// Result alias used throughout the engine crates.
pub type Result<T> = std::result::Result<T, CakeError>;

/// Unified error type for the CAKE engine.
///
/// The fast path (enqueue/dequeue) never fails except for the reshape case;
/// packet losses are counters, not errors. The slow path (construction,
/// reconfiguration) reports through this type.
#[derive(Debug, Error)]
pub enum CakeError {
    /// A configuration parameter was rejected.
    #[error("invalid config: {field}: {message}")]
    InvalidConfig {
        /// Name of the offending knob
        field: &'static str,
        /// What was wrong with it
        message: String,
    },

    /// Memory for the flow tables could not be obtained.
    #[error("allocation failed for {what}")]
    AllocFailed {
        /// Which table failed to allocate
        what: &'static str,
    },

    /// An aggregated packet could not be segmented; the packet is handed
    /// back to the caller for its reshape path.
    #[error("reshape failed: aggregate packet could not be segmented")]
    ReshapeFailed(Box<Packet>),
}

impl CakeError {
    /// Recover the packet from a failed reshape, if this is one.
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            CakeError::ReshapeFailed(pkt) => Some(*pkt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::L3Proto;

    #[test]
    fn test_invalid_config_display() {
        let err = CakeError::InvalidConfig {
            field: "qlen_limit",
            message: "must be nonzero".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid config: qlen_limit: must be nonzero"
        );
    }

    #[test]
    fn test_reshape_returns_packet() {
        let pkt = Packet::new(1500, L3Proto::Ipv4);
        let id = pkt.id;
        let err = CakeError::ReshapeFailed(Box::new(pkt));
        let back = err.into_packet().expect("reshape carries the packet");
        assert_eq!(back.id, id);
    }
}
