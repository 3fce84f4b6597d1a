use crate::prelude::*;

use super::sniffer::{OutFrame, XanbusSniffer};

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelData {
    Shutdown,
}

const READ_TIMEOUT_MS: u64 = 100;
const RECONNECT_DELAY_SECS: u64 = 5;

fn transport_error(channel: &str, e: impl std::fmt::Display) -> anyhow::Error {
    BusError::Transport(format!("{}: {}", channel, e)).into()
}

fn send(socket: &CanSocket, channel: &str, (raw_id, data): &OutFrame) -> Result<()> {
    let id = ExtendedId::new(*raw_id).ok_or_else(|| anyhow!("{:#x} is not an extended id", raw_id))?;
    let frame = CanFrame::new(id, data).ok_or_else(|| anyhow!("can't build frame for {:#x}", raw_id))?;
    socket.write_frame(&frame).map_err(|e| transport_error(channel, e))
}

/// Blocking read loop; runs until `stop` is set or the socket fails.
pub fn run(channel: &str, sniffer: &mut XanbusSniffer, stop: &AtomicBool) -> Result<()> {
    let socket = CanSocket::open(channel).map_err(|e| transport_error(channel, e))?;
    socket
        .set_read_timeout(Duration::from_millis(READ_TIMEOUT_MS))
        .map_err(|e| transport_error(channel, e))?;
    info!("listening for xanbus traffic on {}", channel);

    while !stop.load(Ordering::SeqCst) {
        let frame = match socket.read_frame() {
            Ok(frame) => frame,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => return Err(transport_error(channel, e)),
        };

        let frame = match frame {
            CanFrame::Data(frame) if frame.is_extended() => frame,
            _ => continue,
        };

        for out in sniffer.handle_frame(frame.raw_id(), frame.data()) {
            trace!("xanbus TX {:#x} {}", out.0, Utils::hex(&out.1));
            if let Err(e) = send(&socket, channel, &out) {
                if crate::error::is_fatal(&e) {
                    return Err(e);
                }
                warn!("{}", e);
            }
        }
    }

    info!("xanbus sniffer on {} exiting", channel);
    Ok(())
}

/// The long-lived CAN sniffer task. Reads happen on a blocking thread that
/// checks a stop flag between frames.
#[derive(Clone)]
pub struct CanSniffer {
    config: ConfigWrapper,
    channels: Channels,
    registry: Arc<DeviceRegistry>,
    stop: Arc<AtomicBool>,
}

impl CanSniffer {
    pub fn new(config: ConfigWrapper, channels: Channels, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            config,
            channels,
            registry,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let sniffer_config = self
            .config
            .xanbus_sniffer()
            .ok_or_else(|| anyhow!("xanbus sniffer is not configured"))?;

        let mut shutdown = self.channels.to_xanbus_sniffer.subscribe();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            stop.store(true, Ordering::SeqCst);
        });

        let mut sniffer = XanbusSniffer::new(self.registry.clone())
            .with_serial_overrides(sniffer_config.serial_numbers().clone())
            .with_request_source(sniffer_config.request_source());

        loop {
            let channel = sniffer_config.channel().to_string();
            let stop = self.stop.clone();
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = run(&channel, &mut sniffer, &stop);
                (sniffer, result)
            })
            .await?;
            sniffer = returned;

            match result {
                Ok(()) => break,
                Err(e) => {
                    error!("xanbus sniffer: {}", e);
                    info!("xanbus sniffer: reopening in {}s", RECONNECT_DELAY_SECS);
                }
            }

            for _ in 0..RECONNECT_DELAY_SECS * 10 {
                if self.stop.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
        }

        sniffer.stats().print_summary();
        Ok(())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.channels.to_xanbus_sniffer.send(ChannelData::Shutdown);
    }
}
