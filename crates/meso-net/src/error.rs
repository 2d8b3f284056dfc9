use meso_core::{LinkId, NodeId, SegmentId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("link endpoint {0} does not exist")]
    UnknownNode(NodeId),

    #[error("link {0} has no segments")]
    EmptyLink(LinkId),

    #[error("segment {segment} is malformed: {reason}")]
    BadSegment {
        segment: SegmentId,
        reason: &'static str,
    },
}

pub type NetResult<T> = Result<T, NetError>;
