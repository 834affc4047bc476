//! ragchat core library
//!
//! Streams chat answers from an SSE endpoint:
//! - `framer`: reassembles raw body chunks into `data:` payloads
//! - `session`: request lifecycle and the `idle → running → open → closed` state machine
//! - `transport`: the HTTP seam (reqwest by default)
//! - `config`: endpoint and deadline settings

pub mod cancellation;
pub mod config;
pub mod error;
pub mod framer;
pub mod session;
pub mod state;
pub mod transport;

pub use cancellation::ChatCancellation;
pub use config::ChatConfig;
pub use error::{ChatError, FrameError};
pub use framer::{read_stream, Frame, SseFramer, StreamEnd};
pub use session::{ChatClient, ChatHandle, ChatUpdate};
pub use state::TaskState;
pub use transport::{ByteStream, ChatRequest, ChatResponse, ChatTransport, ReqwestTransport};
