use clap::{ArgAction, Parser};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use shim::{
    EmulatedHost, FdTable, FileId, RamFile, StoreConfig, UnmapStatus, VirtualAddress, VmShim,
    VmaList, profile,
};

mod console;
mod trace;

use console::Console;
use trace::TraceOp;

#[derive(Parser)]
#[command(name = "vmreplay")]
#[command(about = "Replays a trace of mmap, munmap and mprotect calls against an emulated address space")]
struct Args {
    /// Trace file to replay
    trace: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Lowest address a mapping may occupy (e.g., 0x10000)
    #[arg(long, value_parser = parse_address)]
    mmap_floor: Option<usize>,

    /// Upper bound for addresses chosen by the store (e.g., 0x7f0000000000)
    #[arg(long, value_parser = parse_address)]
    mmap_top: Option<usize>,

    /// Maximum number of host pages mapped at once
    #[arg(long)]
    max_pages: Option<usize>,

    /// VMA records in the first record area
    #[arg(long)]
    records: Option<usize>,
}

fn parse_address(value: &str) -> Result<usize, String> {
    trace::parse_unsigned(value)
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| format!("invalid address `{value}`"))
}

type Shim = VmShim<VmaList<EmulatedHost>, FdTable>;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    Console::init(args.verbose)?;

    let source = fs::read_to_string(&args.trace)?;
    let ops = trace::parse(&source)?;

    let defaults = StoreConfig::default();
    let config = StoreConfig {
        mmap_floor: args.mmap_floor.map_or(defaults.mmap_floor, VirtualAddress::new),
        mmap_top: args.mmap_top.map_or(defaults.mmap_top, VirtualAddress::new),
        initial_records: args.records.unwrap_or(defaults.initial_records),
        ..defaults
    };
    let host = match args.max_pages {
        Some(limit) => EmulatedHost::with_page_limit(limit),
        None => EmulatedHost::new(),
    };

    let vm = VmShim::new(VmaList::new(host, config)?, FdTable::new());
    log::info!(
        "replaying {} operations from {}",
        ops.len(),
        args.trace.display()
    );

    profile::init();
    let mut next_file = 1;
    for (line, op) in &ops {
        let outcome = replay(&vm, op, &mut next_file);
        println!("{line:>4}: {op} = {outcome}");
    }
    let counters = profile::teardown();

    println!();
    dump(&vm);
    println!(
        "mmap profile: {} anonymous mappings, {:#x} bytes",
        counters.occurrences, counters.bytes
    );

    Ok(())
}

/// Runs one operation and describes its result.
fn replay(vm: &Shim, op: &TraceOp, next_file: &mut u64) -> String {
    let describe = |result: shim::Result<String>| match result {
        Ok(value) => value,
        Err(err) => format!("{err} ({})", err.errno()),
    };

    match op {
        TraceOp::Mmap {
            addr,
            len,
            prot,
            flags,
            fd,
            offset,
        } => describe(
            vm.mmap(VirtualAddress::new(*addr), *len, *prot, *flags, *fd, *offset)
                .map(|start| format!("{start}")),
        ),
        TraceOp::Munmap { addr, len } => describe(
            vm.munmap(VirtualAddress::new(*addr), *len)
                .map(|status| match status {
                    UnmapStatus::Unmapped => "0".to_string(),
                    UnmapStatus::NoMapping => "0 (nothing mapped)".to_string(),
                }),
        ),
        TraceOp::Mprotect { addr, len, prot } => describe(
            vm.mprotect(VirtualAddress::new(*addr), *len, *prot)
                .map(|()| "0".to_string()),
        ),
        TraceOp::Open { fd, name, mappable } => {
            let id = FileId(*next_file);
            *next_file += 1;
            let file = if *mappable {
                RamFile::new(id, name)
            } else {
                RamFile::without_mmap(id, name)
            };
            vm.handles().insert(*fd, Arc::new(file));
            format!("{id}")
        }
        TraceOp::Close { fd } => match vm.handles().remove(*fd) {
            Some(_) => "0".to_string(),
            None => "not open".to_string(),
        },
        TraceOp::Dump => {
            dump(vm);
            format!("{} vmas", vm.store().len())
        }
    }
}

fn dump(vm: &Shim) {
    let store = vm.store();
    println!(
        "{} vmas, {} records, {} host pages",
        store.len(),
        store.live_records(),
        store.with_host(|host| host.mapped_pages())
    );
    for vma in store.vmas() {
        println!("  {vma}");
    }
}
