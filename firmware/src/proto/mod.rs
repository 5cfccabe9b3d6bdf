//! The JSON wire codec for the command interface: delimiter framing and
//! typed command/response conversion.  Pure library — the responder task
//! owns the socket.

pub mod commands;
pub mod framing;
