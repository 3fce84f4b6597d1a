use thiserror::Error;

/// Events raised while talking to or listening on a bus.
///
/// Only `Transport` is fatal to the loop that owns the bus; everything else is
/// reported and the loop carries on with the next frame or register.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("framing: {0}")]
    Framing(String),

    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("decode: {0}")]
    Decode(String),

    #[error("no response from device {device} for register {register}")]
    NoResponse { device: u8, register: String },
}

impl BusError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Returns true when `err` wraps a fatal `BusError`.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<BusError>()
        .map(BusError::is_fatal)
        .unwrap_or(false)
}

/// Creates an anyhow error with the current file and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        anyhow::anyhow!(
            "[{}:{}] {}",
            std::path::Path::new(file!())
                .file_name()
                .map(|f| f.to_string_lossy())
                .unwrap_or_default(),
            line!(),
            format!($($arg)*)
        )
    };
}
