use crate::prelude::*;

use async_trait::async_trait;
use std::time::Duration;
use tokio_modbus::client::{self, rtu, tcp, Client, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};

/// A request/response register bus.
///
/// `Ok(None)` means the unit didn't answer usefully (exception, timeout,
/// short reply); `Err` means the transport itself is gone.
#[async_trait]
pub trait RegisterBus: Send {
    async fn read_holding(&mut self, unit: u8, address: u16, count: u16)
        -> Result<Option<Vec<u16>>>;

    async fn write_multiple(&mut self, unit: u8, address: u16, words: &[u16])
        -> Result<Option<()>>;
}

pub struct ModbusBus {
    ctx: client::Context,
    timeout: Duration,
    label: String,
}

impl ModbusBus {
    pub async fn tcp(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| anyhow!("can't resolve {}:{}", host, port))?;

        let ctx = match tokio::time::timeout(timeout, tcp::connect(addr)).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => {
                return Err(BusError::Transport(format!("connect {}: {}", addr, e)).into())
            }
            Err(_) => {
                return Err(BusError::Transport(format!(
                    "connect {}: timed out after {:?}",
                    addr, timeout
                ))
                .into())
            }
        };
        info!("connected over modbus/tcp to {}", addr);

        Ok(Self {
            ctx,
            timeout,
            label: addr.to_string(),
        })
    }

    pub fn rtu(port: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let builder = tokio_serial::new(port, baudrate)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .data_bits(tokio_serial::DataBits::Eight)
            .timeout(timeout);

        let stream = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| BusError::Transport(format!("open {}: {}", port, e)))?;
        info!("opened {} at {} baud for modbus/rtu", port, baudrate);

        Ok(Self {
            ctx: rtu::attach_slave(stream, Slave(1)),
            timeout,
            label: port.to_string(),
        })
    }

    pub async fn disconnect(mut self) {
        debug!("closing modbus connection to {}", self.label);
        let _ = self.ctx.disconnect().await;
    }
}

#[async_trait]
impl RegisterBus for ModbusBus {
    async fn read_holding(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<u16>>> {
        self.ctx.set_slave(Slave(unit));

        match tokio::time::timeout(self.timeout, self.ctx.read_holding_registers(address, count))
            .await
        {
            Ok(Ok(Ok(words))) if words.len() == count as usize => Ok(Some(words)),
            Ok(Ok(Ok(words))) => {
                debug!(
                    "{} unit {}: short reply at {:#06x}, {} of {} words",
                    self.label,
                    unit,
                    address,
                    words.len(),
                    count
                );
                Ok(None)
            }
            Ok(Ok(Err(exception))) => {
                debug!("{} unit {}: exception {:?} at {:#06x}", self.label, unit, exception, address);
                Ok(None)
            }
            Ok(Err(e)) => Err(BusError::Transport(format!("{}: {}", self.label, e)).into()),
            Err(_) => {
                debug!("{} unit {}: no reply at {:#06x}", self.label, unit, address);
                Ok(None)
            }
        }
    }

    async fn write_multiple(&mut self, unit: u8, address: u16, words: &[u16]) -> Result<Option<()>> {
        self.ctx.set_slave(Slave(unit));

        match tokio::time::timeout(self.timeout, self.ctx.write_multiple_registers(address, words))
            .await
        {
            Ok(Ok(Ok(()))) => Ok(Some(())),
            Ok(Ok(Err(exception))) => {
                warn!("{} unit {}: write to {:#06x} refused: {:?}", self.label, unit, address, exception);
                Ok(None)
            }
            Ok(Err(e)) => Err(BusError::Transport(format!("{}: {}", self.label, e)).into()),
            Err(_) => Ok(None),
        }
    }
}
