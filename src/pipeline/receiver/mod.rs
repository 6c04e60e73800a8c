//! Receiver pipeline components
//!
//! - ReceiveStage: drains RTP datagrams off the socket channel
//! - Session: demultiplexes datagrams into per-SSRC substreams
//! - Substream: reassembles fragmented access units and feeds a decoder pump
//!
//! The receiver pipeline flow:
//! ```text
//! Network → Receive → Session → Substream → DecoderPump → RenderSink
//! ```

pub mod coordinator;
pub mod receive_stage;
pub mod session;
pub mod substream;

pub use coordinator::ReceiverCoordinator;
pub use receive_stage::ReceiveStage;
pub use session::Session;
pub use substream::{FragmentOutcome, Substream};
