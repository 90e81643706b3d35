use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use asmiflash::{
    BoardDB, Flashing, Region,
    board::parse_number,
    lock::{DEFAULT_LOCK_PATH, SessionLock},
};

#[derive(clap::Parser)]
#[command(
    name = "asmiflash",
    about = "Access the FPGA ASMI core to read or write its configuration flash",
    version
)]
struct Cli {
    /// Write an RPD file
    #[arg(short, long, value_name = "PATH")]
    write: Option<PathBuf>,

    /// Verify the bitstream while writing
    #[arg(short, long, requires = "write")]
    verify: bool,

    /// Read a bitstream back to a file
    #[arg(short, long, value_name = "PATH")]
    read: Option<PathBuf>,

    /// Image slot to access
    #[arg(long, value_enum, default_value_t = Region::default())]
    region: Region,

    /// Board profile name, defaults to the first profile listed
    #[arg(long)]
    board: Option<String>,

    /// Load board profiles from a YAML file instead of the built-in ones
    #[arg(long, value_name = "PATH")]
    board_file: Option<PathBuf>,

    /// Memory device to map the FPGA window from
    #[arg(long, value_name = "PATH")]
    mem_path: Option<PathBuf>,

    /// Offset of the FPGA window in the memory device
    #[arg(long, value_parser = parse_number)]
    fpga_base: Option<u64>,

    /// Largest image accepted, also the size dumped by --read
    #[arg(long, value_parser = parse_number)]
    max_rpd_size: Option<u64>,

    /// Advisory lock held while the bridge is in use
    #[arg(long, value_name = "PATH", default_value = DEFAULT_LOCK_PATH)]
    lock_file: PathBuf,

    /// Fail on illegal erase/write status bits instead of warning
    #[arg(long)]
    strict_status: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::with_template(
            "{msg:>12} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = simplelog::TermLogger::init(
        if cli.debug {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );

    if cli.write.is_none() && cli.read.is_none() {
        Cli::command().print_help()?;
        anyhow::bail!("nothing to do, pass --write or --read");
    }

    let db = match &cli.board_file {
        Some(path) => BoardDB::from_file(path)?,
        None => BoardDB::load()?,
    };
    let mut board = db.find(cli.board.as_deref())?;
    if let Some(mem_path) = cli.mem_path {
        board.mem_path = mem_path;
    }
    if let Some(fpga_base) = cli.fpga_base {
        board.fpga_base = fpga_base;
    }
    if let Some(max_rpd_size) = cli.max_rpd_size {
        board.max_rpd_size = max_rpd_size;
    }
    board.validate()?;
    let offset = board.offset(cli.region);
    log::debug!("{} region at {:#x}", cli.region, offset);

    let _lock = SessionLock::acquire(&cli.lock_file)
        .with_context(|| format!("failed to lock {}", cli.lock_file.display()))?;

    let mut flashing = Flashing::new_from_board(&board)?.with_progress(progress_bar());
    flashing.driver_mut().set_strict_status(cli.strict_status);

    if let Some(path) = &cli.write {
        let len = flashing
            .write_rpd(path, offset, cli.verify)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("rpd_bytes_written={}", len);
        if cli.verify {
            println!("verify_ok=1");
        }
    }

    if let Some(path) = &cli.read {
        let len = flashing
            .read_rpd(path, offset)
            .with_context(|| format!("failed to read flash into {}", path.display()))?;
        println!("rpd_bytes_read={}", len);
    }

    Ok(())
}
