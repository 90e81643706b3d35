//! FPGA configuration flash access over the ASMI bridge register.

pub mod asmi;
pub mod board;
pub mod bridge;
pub mod constants;
pub mod error;
pub mod flashing;
pub mod lock;
pub mod poll;
pub mod protocol;
pub mod reverse;

pub use self::asmi::{AsmiDriver, Timeouts};
pub use self::board::{Board, BoardDB, Region};
pub use self::bridge::{DevMemBridge, RegisterBridge, SimBridge};
pub use self::error::{AsmiError, ProgramError, VerifyMismatch};
pub use self::flashing::Flashing;
pub use self::protocol::{Command, Status};
pub use self::reverse::reverse_bits;
