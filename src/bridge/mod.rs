//! Abstract FPGA register bridge.
pub use self::devmem::DevMemBridge;
pub use self::sim::SimBridge;

mod devmem;
pub mod sim;

/// 32-bit register access into the FPGA window.
/// Might be a `/dev/mem` mapping, a PCI BAR, or a simulator.
///
/// Accesses have side effects on the hardware and there is no locking here;
/// one process is expected to own the window at a time.
pub trait RegisterBridge {
    fn read32(&mut self, offset: usize) -> u32;
    fn write32(&mut self, offset: usize, value: u32);
}

impl<B: RegisterBridge + ?Sized> RegisterBridge for &mut B {
    fn read32(&mut self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}
