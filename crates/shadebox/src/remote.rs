//! OSC over UDP: `/a/b` with arguments `x, y` becomes the line `a,b,x,y`.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use rosc::{OscMessage, OscPacket, OscType};

pub struct RemoteHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RemoteHandle {
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!("osc listener panicked");
            }
        }
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds `0.0.0.0:port` and forwards every decoded message as a command line.
pub fn spawn_osc_listener(
    port: u16,
    commands: Sender<String>,
    shutdown: Arc<AtomicBool>,
) -> Result<RemoteHandle> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .with_context(|| format!("failed to bind OSC port {port}"))?;
    socket
        .set_read_timeout(Some(Duration::from_millis(100)))
        .context("failed to configure OSC socket")?;
    tracing::info!(port, "listening for OSC commands");

    let flag = Arc::clone(&shutdown);
    let join = thread::Builder::new()
        .name("osc".into())
        .spawn(move || {
            let mut buf = [0u8; 2048];
            while !flag.load(Ordering::Relaxed) {
                let size = match socket.recv_from(&mut buf) {
                    Ok((size, _)) => size,
                    Err(err)
                        if matches!(
                            err.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) =>
                    {
                        continue
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "OSC receive failed");
                        break;
                    }
                };
                let packet = match rosc::decoder::decode_udp(&buf[..size]) {
                    Ok((_, packet)) => packet,
                    Err(err) => {
                        tracing::debug!(error = ?err, "dropping malformed OSC packet");
                        continue;
                    }
                };
                let mut lines = Vec::new();
                packet_to_commands(packet, &mut lines);
                for line in lines {
                    tracing::debug!(command = %line, "osc");
                    if commands.send(line).is_err() {
                        return;
                    }
                }
            }
        })
        .context("failed to spawn OSC listener")?;

    Ok(RemoteHandle {
        shutdown,
        join: Some(join),
    })
}

fn packet_to_commands(packet: OscPacket, out: &mut Vec<String>) {
    match packet {
        OscPacket::Message(message) => {
            if let Some(line) = osc_to_command(&message) {
                out.push(line);
            }
        }
        OscPacket::Bundle(bundle) => {
            for packet in bundle.content {
                packet_to_commands(packet, out);
            }
        }
    }
}

/// Joins the address segments and arguments with commas. Floats keep three
/// decimals so they are never read back as integers.
pub fn osc_to_command(message: &OscMessage) -> Option<String> {
    let mut fields: Vec<String> = message
        .addr
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    if fields.is_empty() {
        return None;
    }
    for arg in &message.args {
        let field = match arg {
            OscType::String(text) => text.clone(),
            OscType::Int(value) => value.to_string(),
            OscType::Long(value) => value.to_string(),
            OscType::Float(value) => format!("{value:.3}"),
            OscType::Double(value) => format!("{value:.3}"),
            OscType::Bool(value) => if *value { "on" } else { "off" }.to_string(),
            other => {
                tracing::debug!(arg = ?other, "unsupported OSC argument");
                return None;
            }
        };
        fields.push(field);
    }
    Some(fields.join(","))
}
