/// Byte offset of the combined ASMI read/write register inside the FPGA window.
pub const ASMI_REG_OFFSET: usize = 0x8;

/// Sector erase granularity of the configuration flash.
pub const SECTOR_SIZE: usize = 0x10000;
/// Native page program granularity.
pub const PAGE_SIZE: usize = 256;
/// 21-bit address field, 2MiB of flash.
pub const ADDR_MASK: u32 = 0x1F_FFFF;
pub const FLASH_SIZE: u32 = ADDR_MASK + 1;

/// Largest uncompressed bitstream our FPGAs produce.
pub const MAX_RPD_SIZE: u64 = 950_005;

pub const FACTORY_OFFSET: u32 = 0x0;
pub const APP_OFFSET: u32 = 0xF_0000;

pub mod status {
    pub const DATA_VALID: u32 = 1 << 19;
    pub const ILLEGAL_ERASE: u32 = 1 << 18;
    pub const ILLEGAL_WRITE: u32 = 1 << 17;
    pub const BUSY: u32 = 1 << 16;
}

pub mod timeouts {
    use std::time::Duration;

    pub const DATA_VALID: Duration = Duration::from_millis(100);
    pub const READ_BUSY: Duration = Duration::from_millis(100);
    pub const SECTOR_ERASE: Duration = Duration::from_millis(2500);
    pub const PAGE_PROGRAM: Duration = Duration::from_millis(2500);
    /// An interrupted previous run may have left a page write in flight.
    pub const STARTUP: Duration = Duration::from_millis(2500);
}
