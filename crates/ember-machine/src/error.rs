use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid opcode {opcode:#x} in instruction {word:#010x}")]
    InvalidOpcode { opcode: u32, word: u32 },

    #[error("invalid function code {funct:#x} in instruction {word:#010x}")]
    InvalidFunct { funct: u32, word: u32 },
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("sector {0} out of range")]
    BadSector(u32),

    #[error("device io error: {0}")]
    Io(#[from] std::io::Error),
}
