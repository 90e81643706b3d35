//! RPD image programming logic.
//!
//! Images move through the driver one 64KiB sector at a time: erase, page
//! program, and optionally read back and compare before moving on. The first
//! failure ends the run; sectors already written stay written and a retry
//! starts over from the first chunk.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
};

use indicatif::ProgressBar;

use crate::{
    asmi::AsmiDriver,
    board::Board,
    bridge::{DevMemBridge, RegisterBridge},
    constants::{ASMI_REG_OFFSET, FLASH_SIZE, MAX_RPD_SIZE, SECTOR_SIZE},
    error::{BridgeError, ProgramError, VerifyMismatch},
};

pub struct Flashing<B: RegisterBridge> {
    driver: AsmiDriver<B>,
    /// Largest image accepted for writing, and the size dumped by reads
    max_rpd_size: u64,
    flash_size: u64,
    progress: ProgressBar,
}

impl Flashing<DevMemBridge> {
    pub fn new_from_board(board: &Board) -> Result<Self, BridgeError> {
        let bridge =
            DevMemBridge::open(&board.mem_path, board.fpga_base, board.fpga_window as usize)?;
        bridge.ensure_register(ASMI_REG_OFFSET)?;
        log::debug!("FPGA window for {} mapped", board);

        Ok(Flashing::new(AsmiDriver::open(bridge))
            .with_max_rpd_size(board.max_rpd_size)
            .with_flash_size(board.flash_size))
    }
}

impl<B: RegisterBridge> Flashing<B> {
    pub fn new(driver: AsmiDriver<B>) -> Self {
        Flashing {
            driver,
            max_rpd_size: MAX_RPD_SIZE,
            flash_size: FLASH_SIZE as u64,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_max_rpd_size(mut self, max_rpd_size: u64) -> Self {
        self.max_rpd_size = max_rpd_size;
        self
    }

    pub fn with_flash_size(mut self, flash_size: u64) -> Self {
        self.flash_size = flash_size.min(FLASH_SIZE as u64);
        self
    }

    /// Report bytes moved on `progress`. Hidden by default.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn driver(&self) -> &AsmiDriver<B> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut AsmiDriver<B> {
        &mut self.driver
    }

    fn check_range(&self, len: u64, base: u32) -> Result<(), ProgramError> {
        if len == 0 {
            return Err(ProgramError::Empty);
        }
        // Writing past the end of the image slot clobbers whatever follows it
        if len > self.max_rpd_size {
            return Err(ProgramError::Capacity {
                len,
                max: self.max_rpd_size,
            });
        }
        if (base as u64)
            .checked_add(len)
            .is_none_or(|end| end > self.flash_size)
        {
            return Err(ProgramError::OutOfRange {
                base,
                len,
                flash_size: self.flash_size as u32,
            });
        }
        Ok(())
    }

    fn start_progress(&self, len: u64, phase: &'static str) {
        self.progress.reset();
        self.progress.set_length(len);
        self.progress.set_message(phase);
    }

    /// Program the RPD file at `path` to flash at `base`. Returns bytes written.
    pub fn write_rpd<P: AsRef<Path>>(
        &mut self,
        path: P,
        base: u32,
        verify: bool,
    ) -> Result<u64, ProgramError> {
        let path = path.as_ref();
        let io_err = |source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        log::info!("Opened {} ({} bytes)", path.display(), len);

        self.write_image(file, len, base, verify)
    }

    /// Program `len` bytes from `reader` to flash at `base`.
    pub fn write_image<R: Read>(
        &mut self,
        mut reader: R,
        len: u64,
        base: u32,
        verify: bool,
    ) -> Result<u64, ProgramError> {
        self.check_range(len, base)?;
        log::info!(
            "Writing {} bytes at {:#08x}{}",
            len,
            base,
            if verify { " with verify" } else { "" }
        );
        self.start_progress(len, if verify { "write+verify" } else { "write" });

        for pos in (0..len).step_by(SECTOR_SIZE) {
            let alen = (len - pos).min(SECTOR_SIZE as u64) as usize;
            let addr = base + pos as u32;

            let mut chunk = vec![0u8; alen];
            reader
                .read_exact(&mut chunk)
                .map_err(|source| ProgramError::ShortRead {
                    offset: pos,
                    expected: alen,
                    source,
                })?;

            log::debug!("chunk {:#08x}: {} bytes", addr, alen);
            self.driver.write(&chunk, addr, true)?;

            if verify {
                self.verify_chunk(&chunk, pos, addr)?;
            }
            self.progress.inc(alen as u64);
        }
        self.progress.finish_and_clear();

        log::info!("Wrote {} bytes", len);
        Ok(len)
    }

    /// Read back a just-written chunk and compare all of it.
    fn verify_chunk(&mut self, expected: &[u8], pos: u64, addr: u32) -> Result<(), ProgramError> {
        let actual = self.driver.read_bytes(addr, expected.len(), true)?;

        let mismatches: Vec<VerifyMismatch> = expected
            .iter()
            .zip(&actual)
            .enumerate()
            .filter(|(_, (e, a))| e != a)
            .map(|(i, (&expected, &actual))| VerifyMismatch {
                offset: pos + i as u64,
                addr: addr + i as u32,
                expected,
                actual,
            })
            .collect();

        if mismatches.is_empty() {
            return Ok(());
        }
        for m in &mismatches {
            log::error!(
                "verify failed at {} ({:#08x}), wrote {:#04X}, read back {:#04X}",
                m.offset,
                m.addr,
                m.expected,
                m.actual
            );
        }
        self.progress.abandon();
        Err(ProgramError::Verify { mismatches })
    }

    /// Dump a full image slot from flash at `base` into `path`.
    ///
    /// The RPD format carries no length, so this always reads the maximum
    /// image size. Each chunk is synced to disk before the next is read.
    pub fn read_rpd<P: AsRef<Path>>(&mut self, path: P, base: u32) -> Result<u64, ProgramError> {
        let path = path.as_ref();
        let io_err = |source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        };
        let len = self.max_rpd_size;
        self.check_range(len, base)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_err)?;
        log::info!("Reading {} bytes at {:#08x} into {}", len, base, path.display());
        self.start_progress(len, "read");

        for pos in (0..len).step_by(SECTOR_SIZE) {
            let alen = (len - pos).min(SECTOR_SIZE as u64) as usize;
            let addr = base + pos as u32;

            let chunk = self.driver.read_bytes(addr, alen, true)?;
            file.write_all(&chunk).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;

            log::debug!("chunk {:#08x}: {} bytes", addr, alen);
            self.progress.inc(alen as u64);
        }
        self.progress.finish_and_clear();

        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::bridge::SimBridge;
    use crate::error::AsmiError;

    fn flashing() -> Flashing<SimBridge> {
        Flashing::new(AsmiDriver::open(SimBridge::new()))
    }

    #[test]
    fn oversized_image_rejected_before_hardware() {
        let mut f = flashing();
        let len = MAX_RPD_SIZE + 1;
        let err = f
            .write_image(Cursor::new(vec![0u8; len as usize]), len, 0xF_0000, false)
            .unwrap_err();
        assert!(matches!(err, ProgramError::Capacity { len: 950_006, max: 950_005 }));
        assert_eq!(f.driver().bridge().register_writes(), 0);
    }

    #[test]
    fn empty_image_rejected() {
        let mut f = flashing();
        let err = f.write_image(Cursor::new(Vec::<u8>::new()), 0, 0, false).unwrap_err();
        assert!(matches!(err, ProgramError::Empty));
    }

    #[test]
    fn past_end_of_flash_rejected() {
        let mut f = flashing().with_max_rpd_size(0x20_0000);
        let err = f
            .write_image(Cursor::new(vec![0u8; 0x2_0000]), 0x2_0000, 0x1F_0000, false)
            .unwrap_err();
        assert!(matches!(err, ProgramError::OutOfRange { base: 0x1F_0000, .. }));
        assert_eq!(f.driver().bridge().register_writes(), 0);
    }

    #[test]
    fn huge_dump_size_rejected_without_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dump.rpd");
        let mut f = flashing().with_max_rpd_size(u64::MAX);
        let err = f.read_rpd(&out, 0xF_0000).unwrap_err();
        assert!(matches!(err, ProgramError::OutOfRange { base: 0xF_0000, .. }));
        assert_eq!(f.driver().bridge().register_writes(), 0);
        assert!(!out.exists());
    }

    #[test]
    fn unaligned_base_fails_on_first_chunk() {
        let mut f = flashing();
        let err = f
            .write_image(Cursor::new(vec![0u8; 100]), 100, 0x100, false)
            .unwrap_err();
        assert!(matches!(err, ProgramError::Asmi(AsmiError::Alignment { offset: 0x100, .. })));
        assert_eq!(f.driver().bridge().register_writes(), 0);
    }

    #[test]
    fn short_read_aborts_after_committed_chunks() {
        let mut f = flashing();
        // claims two chunks, delivers one and a bit
        let data = vec![0x5Au8; SECTOR_SIZE + 10];
        let err = f
            .write_image(Cursor::new(data), 2 * SECTOR_SIZE as u64, 0, false)
            .unwrap_err();
        match err {
            ProgramError::ShortRead {
                offset, expected, ..
            } => {
                assert_eq!(offset, SECTOR_SIZE as u64);
                assert_eq!(expected, SECTOR_SIZE);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.driver().bridge().erases(), &[0]);
        assert_eq!(f.driver().bridge().flash()[0], 0x5Au8.reverse_bits());
    }

    #[test]
    fn verify_reports_every_mismatch_in_chunk() {
        let mut f = flashing();
        f.driver_mut().bridge_mut().corrupt(0x1_0005, 0x01);
        f.driver_mut().bridge_mut().corrupt(0x1_0007, 0x80);
        let data: Vec<u8> = (0..SECTOR_SIZE * 2).map(|i| i as u8).collect();
        let err = f
            .write_image(Cursor::new(data), (SECTOR_SIZE * 2) as u64, 0x1_0000, true)
            .unwrap_err();
        let ProgramError::Verify { mismatches } = err else {
            panic!("expected verify failure");
        };
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].offset, 5);
        assert_eq!(mismatches[0].addr, 0x1_0005);
        assert_eq!(mismatches[0].expected, 5);
        assert_eq!(mismatches[0].actual, 5 ^ 0x80);
        assert_eq!(mismatches[1].offset, 7);
        assert_eq!(mismatches[1].actual, 7 ^ 0x01);
        // stopped before the second chunk
        assert_eq!(f.driver().bridge().erases(), &[0x1_0000]);
    }

    #[test]
    fn read_rpd_dumps_fixed_size() {
        let mut sim = SimBridge::new();
        let image: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let raw: Vec<u8> = image.iter().map(|b| b.reverse_bits()).collect();
        sim.load(0xF_0000, &raw);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dump.rpd");
        std::fs::write(&out, vec![0xAA; 5000]).unwrap();

        let mut f = Flashing::new(AsmiDriver::open(sim)).with_max_rpd_size(2000);
        assert_eq!(f.read_rpd(&out, 0xF_0000).unwrap(), 2000);
        let dumped = std::fs::read(&out).unwrap();
        assert_eq!(dumped, &image[..2000]);
        assert_eq!(f.driver().bridge().register_writes(), 2000);
    }
}
