//! Command responder: the single-client JSON-over-TCP interface.
//!
//! Listens on port 5001 and serves one client at a time.  Received bytes go
//! through the frame extractor; each complete command either answers
//! immediately (`get_status`, `get_config`, `get_wifi`), mutates state and
//! returns nothing (`set_*`, `record_*`, `poweroff`), or — for `get_image`
//! — asks the orchestrator for a record and waits up to ~1.5 s for the
//! response buffer to be populated.  Responses are sent in 1 KiB chunks; a
//! send error tears the connection down and returns to the accept loop.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::clock::time;
use crate::drivers::cci::Cci;
use crate::proto::commands::{
    self, apply_config, apply_wifi, parse_command, Command,
};
use crate::proto::framing::FrameExtractor;
use crate::signals::{app, cmd};
use crate::tasks::CoreContext;

/// TCP listening port.
pub const CMD_PORT: u16 = 5001;

/// Budget for another task to produce an asynchronous response.
const RESPONSE_MAX_WAIT: Duration = Duration::from_millis(1500);
const RESPONSE_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Per-send chunk bound.
const MAX_TX_PKT_LEN: usize = 1024;

/// What a handled command asks the socket loop to do next.
pub enum Action {
    /// Nothing to send.
    None,
    /// Send these bytes now.
    Reply(Vec<u8>),
    /// An image was requested; wait for the orchestrator to fill the
    /// response buffer.
    AwaitImage,
}

/// Dispatch one parsed command against the system state.
pub fn handle_command(ctx: &CoreContext, cci: &Cci, command: Command) -> Action {
    match command {
        Command::GetStatus => {
            info!("cmd get_status");
            let Ok(snap) = ctx.store.snapshot() else {
                return Action::None;
            };
            let te = time::now();
            let batt = ctx.readings.batt();
            Action::Reply(commands::status_response(
                snap.wifi.active_ssid(),
                ctx.version,
                ctx.recording.load(Ordering::Relaxed),
                &te,
                &batt,
            ))
        }

        Command::GetConfig => {
            info!("cmd get_config");
            match ctx.store.snapshot() {
                Ok(snap) => Action::Reply(commands::config_response(&snap.op)),
                Err(_) => Action::None,
            }
        }

        Command::GetWifi => {
            info!("cmd get_wifi");
            let Ok(snap) = ctx.store.snapshot() else {
                return Action::None;
            };
            let wifi = ctx.wifi.lock().unwrap();
            Action::Reply(commands::wifi_response(
                &snap.wifi,
                snap.wifi.flags | (wifi.flags() & !crate::net::wifi::FLAG_USER_MASK),
                wifi.current_ip(),
            ))
        }

        Command::SetConfig(args) => {
            info!("cmd set_config");
            let Ok(snap) = ctx.store.snapshot() else {
                return Action::None;
            };
            let mut op = snap.op;
            let old_gain = op.gain_mode;
            apply_config(&args, &mut op);
            if op.gain_mode != old_gain {
                if let Err(e) = cci.set_gain_mode(op.gain_mode) {
                    error!("gain mode update failed: {e}");
                }
            }
            let _ = ctx.store.set_op_state(op);
            ctx.sig.orchestrator.notify(app::RECORD_PARM_UPD);
            Action::None
        }

        Command::SetTime(te) => {
            info!("cmd set_time");
            let _ = ctx.store.set_time(te);
            Action::None
        }

        Command::SetWifi(args) => {
            info!("cmd set_wifi");
            let Ok(snap) = ctx.store.snapshot() else {
                return Action::None;
            };
            let mut info = snap.wifi;
            apply_wifi(&args, &mut info);
            let _ = ctx.store.set_wifi(info);
            ctx.sig.orchestrator.notify(app::NEW_WIFI);
            Action::None
        }

        Command::RecordOn => {
            info!("cmd record_on");
            ctx.sig.orchestrator.notify(app::START_RECORD);
            Action::None
        }

        Command::RecordOff => {
            info!("cmd record_off");
            ctx.sig.orchestrator.notify(app::STOP_RECORD);
            Action::None
        }

        Command::Poweroff => {
            info!("cmd poweroff");
            ctx.sig.orchestrator.notify(app::SHUTDOWN);
            Action::None
        }

        Command::GetImage => {
            info!("cmd get_image");
            ctx.sig.orchestrator.notify(app::CMD_REQ);
            Action::AwaitImage
        }
    }
}

/// Task entry: accept loop on the standard port.
pub fn responder_task(ctx: Arc<CoreContext>, cci: Arc<Cci>) {
    let listener = match TcpListener::bind(("0.0.0.0", CMD_PORT)) {
        Ok(l) => l,
        Err(e) => {
            error!("unable to create listening socket: {e}");
            return;
        }
    };
    responder_serve(ctx, cci, listener)
}

/// Accept loop over an existing listener (tests bind ephemeral ports).
pub fn responder_serve(ctx: Arc<CoreContext>, cci: Arc<Cci>, listener: TcpListener) {
    info!("start task");
    info!("socket listening");

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!("socket accepted: {peer}");
                serve_client(&ctx, &cci, stream);
                info!("shutting down socket and restarting");
            }
            Err(e) => {
                error!("unable to accept connection: {e}");
                return;
            }
        }
    }
}

/// Serve one client until it disconnects or a socket error occurs.
fn serve_client(ctx: &CoreContext, cci: &Cci, mut stream: TcpStream) {
    let mut extractor = FrameExtractor::new();
    // Stale image-ready signals from a dropped client must not satisfy the
    // next request.
    let _ = ctx.sig.responder.take();

    let mut rx = [0u8; 128];
    loop {
        let len = match stream.read(&mut rx) {
            Ok(0) => {
                info!("connection closed");
                return;
            }
            Ok(len) => len,
            Err(e) => {
                error!("recv failed: {e}");
                return;
            }
        };

        extractor.push_bytes(&rx[..len]);
        while let Some(payload) = extractor.next_frame() {
            let action = match parse_command(&payload) {
                Ok(command) => handle_command(ctx, cci, command),
                Err(e) => {
                    error!(
                        "bad command ({e}): {}",
                        String::from_utf8_lossy(&payload)
                    );
                    Action::None
                }
            };

            match action {
                Action::None => {}
                Action::Reply(bytes) => {
                    if send_chunked(&mut stream, &bytes).is_err() {
                        return;
                    }
                }
                Action::AwaitImage => {
                    if !await_and_send_image(ctx, &mut stream) {
                        return;
                    }
                }
            }
        }
    }
}

/// Wait for the orchestrator to populate the response buffer, then send it.
/// Returns false on a socket error (caller tears the connection down).
fn await_and_send_image(ctx: &CoreContext, stream: &mut TcpStream) -> bool {
    let started = Instant::now();
    loop {
        let pending = ctx.sig.responder.wait_timeout(RESPONSE_WAIT_SLICE);
        if pending.has(cmd::IMAGE_READY) {
            let ok = {
                let response = ctx.buf.response.lock().unwrap();
                send_chunked(stream, response.as_slice()).is_ok()
            };
            // Hand the buffer back either way.
            ctx.sig.orchestrator.notify(app::CMD_DONE);
            return ok;
        }
        if started.elapsed() >= RESPONSE_MAX_WAIT {
            warn!("didn't get response in time - dropping command");
            ctx.sig.orchestrator.notify(app::CMD_DONE);
            return true;
        }
    }
}

fn send_chunked(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        let len = (bytes.len() - offset).min(MAX_TX_PKT_LEN);
        if let Err(e) = stream.write_all(&bytes[offset..offset + len]) {
            error!("error in socket send: {e}");
            return Err(e);
        }
        offset += len;
    }
    Ok(())
}
