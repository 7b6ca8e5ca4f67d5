//! Protocol handling for nearchat
//!
//! `binary` is the frame codec and fragmenter, `reassembly` the engine that
//! turns messages into frames and frames back into messages.

pub mod binary;
pub mod reassembly;

pub use binary::{
    // Frame types
    fragment_stream,
    ChatKind,
    FrameHeader,
    MessageKind,
    PayloadBudget,
    ScopePrefix,
    WireFrame,
};

pub use reassembly::{
    spawn_expiry_sweeper,
    DropReason,
    InboundOutcome,
    ReassemblyStats,
    Reassembler,
};
