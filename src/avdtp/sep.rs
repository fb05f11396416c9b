//! Stream endpoint descriptions

use super::{AvdtHandle, MediaType, Seid, Tsep};
use crate::codec::{CodecIndex, CodecInfo};

/// A peer stream endpoint as reported by DISCOVER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerSepInfo {
    /// Peer endpoint identifier
    pub seid: Seid,
    /// Endpoint is already streaming with someone else
    pub in_use: bool,
    /// Media type
    pub media_type: MediaType,
    /// Endpoint type
    pub tsep: Tsep,
}

impl PeerSepInfo {
    /// Whether we can stream with this endpoint as `local`
    #[must_use]
    pub fn is_eligible(&self, media_type: MediaType, local: Tsep) -> bool {
        !self.in_use && self.media_type == media_type && self.tsep == local.opposite()
    }
}

/// A local stream endpoint, one per supported codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocalSep {
    /// AVDTP handle of the endpoint
    pub avdt_handle: AvdtHandle,
    /// Endpoint type
    pub tsep: Tsep,
    /// Codec served by the endpoint
    pub codec: CodecIndex,
    /// Advertised capability
    pub codec_info: CodecInfo,
}
