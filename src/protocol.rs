//! Bit layout of the ASMI bridge register

use std::fmt;

use bitfield::bitfield;

use crate::constants::ADDR_MASK;

/// ASMI operation, bits 31:29 of a register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Operation {
    /// Fetch one byte; completion is signalled by the data-valid toggle.
    Read = 0,
    /// Commit the loaded page buffer at the given address.
    Write = 1,
    /// Erase the 64KiB sector containing the address.
    SectorErase = 2,
    ReadStatus = 3,
    /// Shift one data byte into the core's page buffer.
    PageProgram = 4,
}

impl Operation {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Operation::Read),
            1 => Some(Operation::Write),
            2 => Some(Operation::SectorErase),
            3 => Some(Operation::ReadStatus),
            4 => Some(Operation::PageProgram),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::SectorErase => "sector erase",
            Operation::ReadStatus => "read status",
            Operation::PageProgram => "page program",
        };
        f.write_str(name)
    }
}

bitfield! {
    /// A value written to the ASMI register.
    ///
    /// Bit 31 is reserved and must be written as zero, which is why only
    /// operations 0..=4 are representable.
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Command(u32);
    impl Debug;
    pub u8, op_bits, set_op_bits: 31, 29;
    pub u32, address, set_address: 28, 8;
    pub u8, data, set_data: 7, 0;
}

impl Command {
    fn new(op: Operation, address: u32, data: u8) -> Self {
        let mut cmd = Command(0);
        cmd.set_op_bits(op as u8);
        cmd.set_address(address & ADDR_MASK);
        cmd.set_data(data);
        cmd
    }

    pub fn read(address: u32) -> Self {
        Command::new(Operation::Read, address, 0)
    }

    pub fn write(address: u32) -> Self {
        Command::new(Operation::Write, address, 0)
    }

    pub fn sector_erase(address: u32) -> Self {
        Command::new(Operation::SectorErase, address, 0)
    }

    pub fn read_status() -> Self {
        Command::new(Operation::ReadStatus, 0, 0)
    }

    /// Load one byte into the page buffer. The address field is unused.
    pub fn page_data(byte: u8) -> Self {
        Command::new(Operation::PageProgram, 0, byte)
    }

    pub fn operation(&self) -> Option<Operation> {
        Operation::from_bits(self.op_bits())
    }

    pub fn from_raw(raw: u32) -> Self {
        Command(raw)
    }

    pub fn into_raw(self) -> u32 {
        self.0
    }
}

bitfield! {
    /// A value read back from the ASMI register.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Status(u32);
    impl Debug;
    /// Flips every time the core presents a new data byte.
    pub data_valid, set_data_valid: 19;
    pub illegal_erase, set_illegal_erase: 18;
    pub illegal_write, set_illegal_write: 17;
    pub busy, set_busy: 16;
    pub u8, flash_status, set_flash_status: 15, 8;
    pub u8, data, set_data: 7, 0;
}

impl Status {
    pub fn from_raw(raw: u32) -> Self {
        Status(raw)
    }

    pub fn into_raw(self) -> u32 {
        self.0
    }
}
