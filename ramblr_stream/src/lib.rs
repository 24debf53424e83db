pub mod catalog;
pub mod config;
pub mod connection;
pub mod extract;
pub mod handshake;
pub mod http;
pub mod process;
pub mod router;
pub mod send_queue;
pub mod throttle;
pub mod token;
pub mod ws_actor;

pub use crate::catalog::{InstructionCatalog, SlotView, StepWidgets, PAGE_SIZE};
pub use crate::config::{ConfigError, StreamConfig, Timings};
pub use crate::connection::{CloseReason, ConnectionManager, ConnectionState, Directive};
pub use crate::handshake::HandshakeMethod;
pub use crate::http::{HttpBackend, HttpError, HttpReply, ReqwestBackend};
pub use crate::throttle::{
    EncodeError, EncodeSettings, Frame, FrameEncoder, FrameSize, FrameSource, ImageFormat,
    Quality,
};
pub use crate::token::{AuthError, Token, TokenProvider};
pub use crate::ws_actor::{
    channel, run, Collaborators, SessionCommand, SessionExit, SessionHandle, SessionObserver,
    SessionSnapshot, StartError, StatusEvent,
};
