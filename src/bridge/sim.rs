//! In-memory ASMI core and configuration flash.
//!
//! Behaves like the FPGA side of the bridge closely enough to run the driver
//! against: a 2MiB NOR array that only clears bits when programmed, a 256 byte
//! page buffer, a busy flag that stays up for a configurable number of
//! register reads, and the data-valid toggle. Fault knobs let tests wedge the
//! busy flag, freeze the toggle, corrupt readback, or protect a range.

use std::{collections::HashMap, ops::Range};

use super::RegisterBridge;
use crate::constants::{ADDR_MASK, ASMI_REG_OFFSET, FLASH_SIZE, PAGE_SIZE, SECTOR_SIZE};
use crate::protocol::{Command, Operation, Status};

pub struct SimBridge {
    flash: Vec<u8>,
    page: Vec<u8>,
    data: u8,
    toggle: bool,
    busy_left: u32,
    latency: u32,
    stuck_busy: bool,
    frozen_toggle: bool,
    illegal_erase: bool,
    illegal_write: bool,
    page_overflow: bool,
    corrupt: HashMap<u32, u8>,
    protected: Option<Range<u32>>,
    register_writes: usize,
    erases: Vec<u32>,
    page_writes: Vec<(u32, usize)>,
}

impl Default for SimBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBridge {
    /// Erased flash, busy for two register reads after every command.
    pub fn new() -> Self {
        SimBridge {
            flash: vec![0xFF; FLASH_SIZE as usize],
            page: Vec::with_capacity(PAGE_SIZE),
            data: 0,
            toggle: false,
            busy_left: 0,
            latency: 2,
            stuck_busy: false,
            frozen_toggle: false,
            illegal_erase: false,
            illegal_write: false,
            page_overflow: false,
            corrupt: HashMap::new(),
            protected: None,
            register_writes: 0,
            erases: Vec::new(),
            page_writes: Vec::new(),
        }
    }

    /// Raw flash contents, in on-flash (bit reversed) order.
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Preload raw flash contents at `addr`.
    pub fn load(&mut self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        self.flash[start..start + data.len()].copy_from_slice(data);
    }

    /// Number of register reads the busy flag stays up after a command.
    pub fn set_latency(&mut self, reads: u32) {
        self.latency = reads;
    }

    /// Keep busy asserted forever, as a wedged core would.
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    /// Stop flipping the data-valid toggle on reads.
    pub fn set_frozen_toggle(&mut self, frozen: bool) {
        self.frozen_toggle = frozen;
    }

    /// XOR the byte read back from `addr` with `mask`.
    pub fn corrupt(&mut self, addr: u32, mask: u8) {
        self.corrupt.insert(addr & ADDR_MASK, mask);
    }

    /// Refuse erase and program inside `range`, flagging illegal erase/write.
    pub fn protect(&mut self, range: Range<u32>) {
        self.protected = Some(range);
    }

    /// Every 32-bit write issued to the bridge, at any offset.
    pub fn register_writes(&self) -> usize {
        self.register_writes
    }

    /// Addresses of the sector erase commands received, in order.
    pub fn erases(&self) -> &[u32] {
        &self.erases
    }

    /// Address and length of each committed page, in order.
    pub fn page_writes(&self) -> &[(u32, usize)] {
        &self.page_writes
    }

    fn is_protected(&self, addr: u32) -> bool {
        self.protected.as_ref().is_some_and(|r| r.contains(&addr))
    }

    fn start_busy(&mut self) {
        self.busy_left = self.latency;
    }

    fn execute(&mut self, cmd: Command) {
        let addr = cmd.address();
        match cmd.operation() {
            Some(Operation::Read) => {
                let raw = self.flash[addr as usize];
                self.data = raw ^ self.corrupt.get(&addr).copied().unwrap_or(0);
                if !self.frozen_toggle {
                    self.toggle = !self.toggle;
                }
                self.start_busy();
            }
            Some(Operation::PageProgram) => {
                if self.page.len() < PAGE_SIZE {
                    self.page.push(cmd.data());
                } else {
                    self.page_overflow = true;
                }
            }
            Some(Operation::Write) => {
                self.illegal_erase = false;
                self.illegal_write = self.page_overflow || self.is_protected(addr);
                self.page_overflow = false;
                if !self.illegal_write {
                    for (i, b) in self.page.iter().enumerate() {
                        let a = ((addr as usize) + i) & ADDR_MASK as usize;
                        self.flash[a] &= *b;
                    }
                    self.page_writes.push((addr, self.page.len()));
                }
                self.page.clear();
                self.start_busy();
            }
            Some(Operation::SectorErase) => {
                self.illegal_write = false;
                self.illegal_erase = self.is_protected(addr);
                self.erases.push(addr);
                if !self.illegal_erase {
                    let start = addr as usize & !(SECTOR_SIZE - 1);
                    self.flash[start..start + SECTOR_SIZE].fill(0xFF);
                }
                self.start_busy();
            }
            Some(Operation::ReadStatus) => {
                self.data = 0;
            }
            None => log::warn!("sim: undefined ASMI operation in {:#010x}", cmd.into_raw()),
        }
    }
}

impl RegisterBridge for SimBridge {
    fn read32(&mut self, offset: usize) -> u32 {
        if offset != ASMI_REG_OFFSET {
            return 0;
        }
        let mut st = Status::default();
        st.set_data_valid(self.toggle);
        st.set_illegal_erase(self.illegal_erase);
        st.set_illegal_write(self.illegal_write);
        st.set_busy(self.stuck_busy || self.busy_left > 0);
        st.set_data(self.data);
        self.busy_left = self.busy_left.saturating_sub(1);
        st.into_raw()
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.register_writes += 1;
        if offset == ASMI_REG_OFFSET {
            self.execute(Command::from_raw(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg_write(sim: &mut SimBridge, cmd: Command) {
        sim.write32(ASMI_REG_OFFSET, cmd.into_raw());
    }

    fn read_status(sim: &mut SimBridge) -> Status {
        Status::from_raw(sim.read32(ASMI_REG_OFFSET))
    }

    #[test]
    fn busy_clears_after_latency() {
        let mut sim = SimBridge::new();
        sim.set_latency(3);
        reg_write(&mut sim, Command::sector_erase(0));
        assert!(read_status(&mut sim).busy());
        assert!(read_status(&mut sim).busy());
        assert!(read_status(&mut sim).busy());
        assert!(!read_status(&mut sim).busy());
    }

    #[test]
    fn program_only_clears_bits() {
        let mut sim = SimBridge::new();
        sim.set_latency(0);
        sim.load(0x100, &[0x0F]);
        reg_write(&mut sim, Command::page_data(0xF3));
        reg_write(&mut sim, Command::write(0x100));
        assert_eq!(sim.flash()[0x100], 0x03);
        assert_eq!(sim.page_writes(), &[(0x100, 1)]);
    }

    #[test]
    fn erase_resets_containing_sector() {
        let mut sim = SimBridge::new();
        sim.load(0x1_0000, &[0u8; 16]);
        sim.load(0x2_0000, &[0u8; 16]);
        reg_write(&mut sim, Command::sector_erase(0x1_0000));
        assert!(sim.flash()[0x1_0000..0x1_0010].iter().all(|&b| b == 0xFF));
        assert!(sim.flash()[0x2_0000..0x2_0010].iter().all(|&b| b == 0x00));
        assert_eq!(sim.erases(), &[0x1_0000]);
    }

    #[test]
    fn read_flips_toggle_and_latches_data() {
        let mut sim = SimBridge::new();
        sim.load(0x42, &[0x5A]);
        let before = read_status(&mut sim).data_valid();
        reg_write(&mut sim, Command::read(0x42));
        let st = read_status(&mut sim);
        assert_ne!(st.data_valid(), before);
        assert_eq!(st.data(), 0x5A);
    }

    #[test]
    fn protected_range_flags_illegal_ops() {
        let mut sim = SimBridge::new();
        sim.protect(0..0x1_0000);
        sim.load(0x10, &[0x00]);
        reg_write(&mut sim, Command::sector_erase(0));
        let st = read_status(&mut sim);
        assert!(st.illegal_erase());
        assert_eq!(sim.flash()[0x10], 0x00);

        reg_write(&mut sim, Command::page_data(0x00));
        reg_write(&mut sim, Command::write(0x20));
        let st = read_status(&mut sim);
        assert!(st.illegal_write());
        assert!(!st.illegal_erase());
        assert!(sim.page_writes().is_empty());
    }
}
