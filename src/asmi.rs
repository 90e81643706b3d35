//! ASMI protocol driver.
//!
//! Every transfer is one byte wide. Reads are synchronized on the data-valid
//! toggle (edge, not level), erases and page writes on the busy flag.

use std::time::Duration;

use crate::bridge::RegisterBridge;
use crate::constants::{ADDR_MASK, ASMI_REG_OFFSET, PAGE_SIZE, SECTOR_SIZE, timeouts};
use crate::error::{AsmiError, Result, WaitOp};
use crate::poll::{Elapsed, poll_until};
use crate::protocol::{Command, Status};
use crate::reverse::{reverse_bits, reverse_slice};

/// Deadlines for each kind of wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub data_valid: Duration,
    pub read_busy: Duration,
    pub sector_erase: Duration,
    pub page_program: Duration,
    pub startup: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            data_valid: timeouts::DATA_VALID,
            read_busy: timeouts::READ_BUSY,
            sector_erase: timeouts::SECTOR_ERASE,
            page_program: timeouts::PAGE_PROGRAM,
            startup: timeouts::STARTUP,
        }
    }
}

pub struct AsmiDriver<B: RegisterBridge> {
    bridge: B,
    /// Data-valid level seen with the last accepted byte
    last_toggle: bool,
    timeouts: Timeouts,
    strict_status: bool,
}

/// Wraps the poll result of a wait into a timeout error.
fn timed_out(op: WaitOp, addr: Option<u32>) -> impl FnOnce(Elapsed) -> AsmiError {
    move |Elapsed(elapsed)| AsmiError::Timeout { op, addr, elapsed }
}

impl<B: RegisterBridge> AsmiDriver<B> {
    pub fn open(bridge: B) -> Self {
        Self::open_with_timeouts(bridge, Timeouts::default())
    }

    /// Take over the core and seed the toggle state.
    ///
    /// A previous run killed mid erase or page write leaves the core busy, so
    /// this first waits out the startup deadline. Still being busy after it
    /// is only logged; the first real operation will time out on its own.
    pub fn open_with_timeouts(bridge: B, timeouts: Timeouts) -> Self {
        let mut driver = AsmiDriver {
            bridge,
            last_toggle: false,
            timeouts,
            strict_status: false,
        };
        if let Err(e) = driver.await_not_busy(timeouts.startup) {
            log::warn!("{}, continuing anyway", e);
        }
        let st = driver.status();
        driver.last_toggle = st.data_valid();
        log::debug!("ASMI opened: {:?}", st);
        driver
    }

    /// Turn illegal erase/write status bits into errors instead of warnings.
    pub fn set_strict_status(&mut self, strict: bool) {
        self.strict_status = strict;
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    pub fn status(&mut self) -> Status {
        Status::from_raw(self.bridge.read32(ASMI_REG_OFFSET))
    }

    fn command(&mut self, cmd: Command) {
        self.bridge.write32(ASMI_REG_OFFSET, cmd.into_raw());
        // flush the posted write
        self.bridge.read32(ASMI_REG_OFFSET);
    }

    fn wait_idle(&mut self, timeout: Duration, op: WaitOp, addr: Option<u32>) -> Result<Status> {
        let bridge = &mut self.bridge;
        poll_until(
            timeout,
            || Status::from_raw(bridge.read32(ASMI_REG_OFFSET)),
            |st| !st.busy(),
        )
        .map_err(timed_out(op, addr))
    }

    pub fn await_not_busy(&mut self, timeout: Duration) -> Result<Status> {
        self.wait_idle(timeout, WaitOp::Busy, None)
    }

    fn check_status(&self, st: Status, addr: u32) -> Result<()> {
        if st.illegal_erase() {
            if self.strict_status {
                return Err(AsmiError::IllegalErase { addr });
            }
            log::warn!("ASMI flagged illegal erase at {:#08x}", addr);
        }
        if st.illegal_write() {
            if self.strict_status {
                return Err(AsmiError::IllegalWrite { addr });
            }
            log::warn!("ASMI flagged illegal write at {:#08x}", addr);
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, addr: u32, count: usize, reverse: bool) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_into(addr, &mut buf, reverse)?;
        Ok(buf)
    }

    /// Fill `buf` from flash starting at `addr`, one READ per byte.
    pub fn read_into(&mut self, addr: u32, buf: &mut [u8], reverse: bool) -> Result<()> {
        let data_valid_timeout = self.timeouts.data_valid;
        let read_busy_timeout = self.timeouts.read_busy;

        for (i, out) in buf.iter_mut().enumerate() {
            let a = addr.wrapping_add(i as u32) & ADDR_MASK;
            self.command(Command::read(a));

            // data_valid must toggle on every read
            let last = self.last_toggle;
            let bridge = &mut self.bridge;
            let st = poll_until(
                data_valid_timeout,
                || Status::from_raw(bridge.read32(ASMI_REG_OFFSET)),
                |st| st.data_valid() != last,
            )
            .map_err(timed_out(WaitOp::DataValid, Some(a)))?;
            self.last_toggle = st.data_valid();

            *out = if reverse {
                reverse_bits(st.data())
            } else {
                st.data()
            };

            self.wait_idle(read_busy_timeout, WaitOp::Read, Some(a))?;
        }
        Ok(())
    }

    /// Erase every 64KiB sector covering `[addr, addr + size)`.
    pub fn erase(&mut self, addr: u32, size: usize) -> Result<()> {
        if addr as usize % SECTOR_SIZE != 0 {
            return Err(AsmiError::Alignment {
                offset: addr,
                len: size,
            });
        }
        let timeout = self.timeouts.sector_erase;
        for block in (0..size).step_by(SECTOR_SIZE) {
            let a = addr.wrapping_add(block as u32) & ADDR_MASK;
            log::trace!("sector erase {:#08x}", a);
            self.command(Command::sector_erase(a));
            let st = self.wait_idle(timeout, WaitOp::SectorErase, Some(a))?;
            self.check_status(st, a)?;
        }
        Ok(())
    }

    /// Program `buf` at `addr` in 256 byte pages. The range must be erased.
    pub fn page_program(&mut self, buf: &[u8], addr: u32) -> Result<()> {
        let timeout = self.timeouts.page_program;
        for (i, page) in buf.chunks(PAGE_SIZE).enumerate() {
            let a = addr.wrapping_add((i * PAGE_SIZE) as u32) & ADDR_MASK;
            for &b in page {
                self.command(Command::page_data(b));
            }
            self.command(Command::write(a));
            let st = self.wait_idle(timeout, WaitOp::PageProgram, Some(a))?;
            self.check_status(st, a)?;
        }
        Ok(())
    }

    /// Erase and program one sector-aligned chunk of at most 64KiB.
    ///
    /// The sector is always erased first, even when only part of it changes.
    pub fn write(&mut self, data: &[u8], offset: u32, reverse: bool) -> Result<()> {
        if offset as usize % SECTOR_SIZE != 0 || data.len() > SECTOR_SIZE {
            return Err(AsmiError::Alignment {
                offset,
                len: data.len(),
            });
        }

        let mut wbuf = data.to_vec();
        if reverse {
            reverse_slice(&mut wbuf);
        }

        self.erase(offset, wbuf.len())?;
        self.page_program(&wbuf, offset)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::bridge::SimBridge;

    fn fast_timeouts() -> Timeouts {
        Timeouts {
            data_valid: Duration::from_millis(20),
            read_busy: Duration::from_millis(20),
            sector_erase: Duration::from_millis(30),
            page_program: Duration::from_millis(30),
            startup: Duration::from_millis(10),
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn open_only_reads() {
        let driver = AsmiDriver::open(SimBridge::new());
        assert_eq!(driver.bridge().register_writes(), 0);
    }

    #[test]
    fn open_tolerates_stale_busy() {
        let mut sim = SimBridge::new();
        sim.set_stuck_busy(true);
        let start = Instant::now();
        let driver = AsmiDriver::open_with_timeouts(sim, fast_timeouts());
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(driver.bridge().register_writes(), 0);
    }

    #[test]
    fn unaligned_erase_touches_nothing() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        for addr in [1, 0x100, 0x8000, 0xF_0001, 0xF_FFFF] {
            let err = driver.erase(addr, 0x1_0000).unwrap_err();
            assert!(matches!(err, AsmiError::Alignment { offset, .. } if offset == addr));
        }
        assert_eq!(driver.bridge().register_writes(), 0);
    }

    #[test]
    fn unaligned_or_oversized_write_touches_nothing() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        let chunk = vec![0u8; 16];
        assert!(matches!(
            driver.write(&chunk, 0x10, true),
            Err(AsmiError::Alignment { offset: 0x10, len: 16 })
        ));
        let big = vec![0u8; SECTOR_SIZE + 1];
        assert!(matches!(
            driver.write(&big, 0x1_0000, true),
            Err(AsmiError::Alignment { len, .. }) if len == SECTOR_SIZE + 1
        ));
        assert_eq!(driver.bridge().register_writes(), 0);
    }

    #[test]
    fn erase_issues_one_command_per_sector() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        driver.erase(0xF_0000, 3 * SECTOR_SIZE + 1).unwrap();
        assert_eq!(
            driver.bridge().erases(),
            &[0xF_0000, 0x10_0000, 0x11_0000, 0x12_0000]
        );

        driver.erase(0x2_0000, 0).unwrap();
        assert_eq!(driver.bridge().erases().len(), 4);
    }

    #[test]
    fn page_program_splits_into_pages() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        let data = pattern(600);
        driver.page_program(&data, 0x3_0000).unwrap();
        assert_eq!(
            driver.bridge().page_writes(),
            &[(0x3_0000, 256), (0x3_0100, 256), (0x3_0200, 88)]
        );
        assert_eq!(&driver.bridge().flash()[0x3_0000..0x3_0000 + 600], &data[..]);
    }

    #[test]
    fn write_stores_reversed_and_reads_back() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        let data = pattern(1000);
        driver.write(&data, 0x5_0000, true).unwrap();

        let raw = driver.bridge().flash()[0x5_0000..0x5_0000 + data.len()].to_vec();
        assert!(raw.iter().zip(&data).all(|(&r, &d)| r == d.reverse_bits()));

        let back = driver.read_bytes(0x5_0000, data.len(), true).unwrap();
        assert_eq!(back, data);
        let raw_back = driver.read_bytes(0x5_0000, 4, false).unwrap();
        assert_eq!(&raw_back[..], &raw[..4]);
    }

    #[test]
    fn write_always_erases_first() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        driver.write(&[0x00; 32], 0, false).unwrap();
        driver.write(&[0xF0; 16], 0, false).unwrap();
        let flash = driver.bridge().flash();
        assert!(flash[..16].iter().all(|&b| b == 0xF0));
        assert!(flash[16..32].iter().all(|&b| b == 0xFF));
        assert_eq!(driver.bridge().erases(), &[0, 0]);
    }

    #[test]
    fn read_address_wraps_at_2mib() {
        let mut sim = SimBridge::new();
        sim.load(0x1F_FFFF, &[0x11]);
        sim.load(0, &[0x22]);
        let mut driver = AsmiDriver::open(sim);
        let back = driver.read_bytes(0x1F_FFFF, 2, false).unwrap();
        assert_eq!(back, [0x11, 0x22]);
    }

    #[test]
    fn stuck_busy_times_out_at_deadline() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        driver.bridge_mut().set_stuck_busy(true);
        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        let err = driver.await_not_busy(timeout).unwrap_err();
        let waited = start.elapsed();
        match err {
            AsmiError::Timeout { op, elapsed, .. } => {
                assert_eq!(op, WaitOp::Busy);
                assert!(elapsed >= timeout);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(waited >= timeout);
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn erase_timeout_names_failing_block() {
        let mut driver = AsmiDriver::open_with_timeouts(SimBridge::new(), fast_timeouts());
        driver.bridge_mut().set_stuck_busy(true);
        let err = driver.erase(0x4_0000, 2 * SECTOR_SIZE).unwrap_err();
        assert!(matches!(
            err,
            AsmiError::Timeout { op: WaitOp::SectorErase, addr: Some(0x4_0000), .. }
        ));
        assert_eq!(driver.bridge().erases(), &[0x4_0000]);
    }

    #[test]
    fn page_timeout_names_failing_page() {
        let mut driver = AsmiDriver::open_with_timeouts(SimBridge::new(), fast_timeouts());
        driver.bridge_mut().set_stuck_busy(true);
        let err = driver.page_program(&[0u8; 512], 0x1000).unwrap_err();
        assert!(matches!(
            err,
            AsmiError::Timeout { op: WaitOp::PageProgram, addr: Some(0x1000), .. }
        ));
    }

    #[test]
    fn frozen_toggle_times_out_instead_of_stale_data() {
        let mut sim = SimBridge::new();
        sim.set_frozen_toggle(true);
        let mut driver = AsmiDriver::open(sim);
        let start = Instant::now();
        let err = driver.read_bytes(0x100, 4, true).unwrap_err();
        match err {
            AsmiError::Timeout { op, addr, elapsed } => {
                assert_eq!(op, WaitOp::DataValid);
                assert_eq!(addr, Some(0x100));
                assert!(elapsed >= timeouts::DATA_VALID);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn busy_after_read_times_out() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        driver.bridge_mut().set_stuck_busy(true);
        let start = Instant::now();
        let err = driver.read_bytes(0x40, 2, true).unwrap_err();
        match err {
            AsmiError::Timeout { op, addr, elapsed } => {
                assert_eq!(op, WaitOp::Read);
                assert_eq!(addr, Some(0x40));
                assert!(elapsed >= timeouts::READ_BUSY);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn drives_a_borrowed_bridge() {
        let mut sim = SimBridge::new();
        AsmiDriver::open(&mut sim).write(&[0x01; 4], 0x2_0000, true).unwrap();
        assert_eq!(&sim.flash()[0x2_0000..0x2_0004], &[0x80; 4]);
        assert_eq!(sim.erases(), &[0x2_0000]);
    }

    #[test]
    fn toggle_state_carries_across_calls() {
        let mut driver = AsmiDriver::open(SimBridge::new());
        for _ in 0..3 {
            assert_eq!(driver.read_bytes(0, 3, false).unwrap(), [0xFF; 3]);
        }
    }

    #[test]
    fn illegal_status_is_diagnostic_by_default() {
        let mut sim = SimBridge::new();
        sim.protect(0..0x1_0000);
        let mut driver = AsmiDriver::open(sim);
        driver.write(&[0u8; 8], 0, false).unwrap();
        assert!(driver.bridge().page_writes().is_empty());
    }

    #[test]
    fn strict_status_escalates_illegal_erase() {
        let mut sim = SimBridge::new();
        sim.protect(0x1_0000..0x2_0000);
        let mut driver = AsmiDriver::open(sim);
        driver.set_strict_status(true);
        driver.write(&[0u8; 8], 0, false).unwrap();
        let err = driver.write(&[0u8; 8], 0x1_0000, false).unwrap_err();
        assert!(matches!(err, AsmiError::IllegalErase { addr: 0x1_0000 }));
    }

    #[test]
    fn strict_status_escalates_illegal_write() {
        let mut sim = SimBridge::new();
        sim.protect(0x1_0000..0x2_0000);
        let mut driver = AsmiDriver::open(sim);
        driver.set_strict_status(true);
        driver.page_program(&[0u8; 8], 0x100).unwrap();
        let err = driver.page_program(&[0u8; 8], 0x1_0000).unwrap_err();
        assert!(matches!(err, AsmiError::IllegalWrite { addr: 0x1_0000 }));
        assert_eq!(driver.bridge().page_writes(), &[(0x100, 8)]);
    }
}
