//! Log Dump Binary
//!
//! Prints the contents of an operation log, either every segment of one
//! tablet's log or a single segment file.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use oplog::log::{ReplicateMsg, SegmentFooter, SegmentHeader, SegmentScan, TailDamage};
use oplog::row_ops;
use oplog::{Arena, LogConfig, LogEntry, LogReader, ReadableSegment, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// How entries are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PrintEntries {
    /// Headers and footers only
    None,
    /// Ids, operation types and decoded row operations
    Decoded,
    /// Rust debug form of every entry
    Debug,
    /// Entry ids only
    Id,
}

/// Operation log dump tool
#[derive(Parser, Debug)]
#[command(name = "log-dump")]
#[command(about = "Dump the contents of an operation log")]
#[command(version)]
struct Args {
    /// Either `<data_dir> <tablet_id>` or `<segment_path>`
    #[arg(required = true, num_args = 1..=2)]
    paths: Vec<PathBuf>,

    /// Print segment headers and footers
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    print_headers: bool,

    /// How to print entries
    #[arg(long, value_enum, default_value_t = PrintEntries::Decoded)]
    print_entries: PrintEntries,

    /// Truncate printed payloads to this many characters (0 disables)
    #[arg(long, default_value_t = 100)]
    truncate_data: usize,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,oplog=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match args.paths.as_slice() {
        [data_dir, tablet_id] => dump_log(&args, data_dir, &tablet_id.to_string_lossy()),
        [segment_path] => dump_segment_file(&args, segment_path),
        _ => unreachable!("clap enforces one or two paths"),
    };

    if let Err(e) = result {
        tracing::error!("Dump failed: {}", e);
        std::process::exit(1);
    }
}

// =============================================================================
// Dumping
// =============================================================================

fn dump_log(args: &Args, data_dir: &Path, tablet_id: &str) -> Result<()> {
    let config = LogConfig::builder().data_dir(data_dir).build();
    let log_dir = config.log_dir(tablet_id);
    tracing::info!("Dumping log: {}", log_dir.display());

    let reader = LogReader::open_with_index(&log_dir, None, &config)?;
    for issue in reader.issues() {
        println!("Issue: {issue:?}");
    }

    let mut arena = Arena::from_config(&config);
    for segment in reader.segments_snapshot().iter() {
        dump_segment(args, segment, &mut arena)?;
    }
    Ok(())
}

fn dump_segment_file(args: &Args, path: &Path) -> Result<()> {
    let segment = ReadableSegment::open(path)?;
    let mut arena = Arena::default();
    dump_segment(args, &segment, &mut arena)
}

fn dump_segment(args: &Args, segment: &ReadableSegment, arena: &mut Arena) -> Result<()> {
    if args.print_headers {
        print_header(segment.path(), segment.header());
    }

    let scan = segment.scan()?;
    if args.print_entries != PrintEntries::None {
        for scanned in &scan.entries {
            print_entry(args, segment.header(), &scanned.entry, arena);
        }
    }

    if args.print_headers {
        match segment.footer() {
            Some(footer) => print_footer(footer),
            None => print_unsealed(&scan),
        }
    }
    Ok(())
}

// =============================================================================
// Printing
// =============================================================================

fn print_header(path: &Path, header: &SegmentHeader) {
    println!("Segment: {}", path.display());
    println!("Header:");
    println!("  tablet_id: {}", header.tablet_id);
    println!("  sequence_number: {}", header.sequence_number);
    println!("  schema: {}", header.schema);
    println!("  created_at_micros: {}", header.created_at_micros);
}

fn print_footer(footer: &SegmentFooter) {
    println!("Footer:");
    println!("  num_entries: {}", footer.num_entries);
    println!("  min_op_id: {}", display_op_id(footer.min_op_id));
    println!("  max_op_id: {}", display_op_id(footer.max_op_id));
    println!("  total_entry_bytes: {}", footer.total_entry_bytes);
    println!("  closed_at_micros: {}", footer.closed_at_micros);
}

fn print_unsealed(scan: &SegmentScan) {
    println!("Footer: none (unsealed, {} entries)", scan.entries.len());
    match &scan.tail_damage {
        Some(TailDamage::Truncated {
            offset,
            declared,
            available,
        }) => println!(
            "  torn tail at {offset}: frame declares {declared} bytes, {available} present"
        ),
        Some(TailDamage::ChecksumMismatch { offset }) => {
            println!("  torn tail at {offset}: checksum mismatch")
        }
        Some(TailDamage::Oversized { offset, declared }) => {
            println!("  torn tail at {offset}: implausible frame length {declared}")
        }
        Some(TailDamage::ZeroFilled { offset }) => println!("  zero-filled from {offset}"),
        None => {}
    }
}

fn print_entry(args: &Args, header: &SegmentHeader, entry: &LogEntry, arena: &mut Arena) {
    match args.print_entries {
        PrintEntries::None => {}
        PrintEntries::Id => match entry {
            LogEntry::Replicate(msg) => println!("REPLICATE {}", msg.id),
            LogEntry::Commit(msg) => println!("COMMIT {}", msg.committed_id),
        },
        PrintEntries::Debug => println!("{}", truncate(&format!("{entry:?}"), args.truncate_data)),
        PrintEntries::Decoded => match entry {
            LogEntry::Replicate(msg) => print_replicate(args, header, msg, arena),
            LogEntry::Commit(msg) => println!("COMMIT {}", msg.committed_id),
        },
    }
}

fn print_replicate(args: &Args, header: &SegmentHeader, msg: &ReplicateMsg, arena: &mut Arena) {
    println!("REPLICATE {}@{} {}", msg.id, msg.timestamp, msg.op_type.name());
    let request = match msg.write_request() {
        Ok(request) => request,
        Err(_) => {
            if !msg.payload.is_empty() {
                let hex: String = msg.payload.iter().map(|b| format!("{b:02x}")).collect();
                println!("  payload: {}", truncate(&hex, args.truncate_data));
            }
            return;
        }
    };

    println!("  tablet_id: {}", request.tablet_id);
    println!("  consistency_mode: {}", request.consistency_mode.name());
    if let Some(ts) = request.propagated_timestamp {
        println!("  propagated_timestamp: {ts}");
    }

    arena.reset();
    match row_ops::decode(&request.row_operations, &request.schema, &header.schema, arena) {
        Ok(ops) => {
            for (i, op) in ops.iter().enumerate() {
                let line = op.describe(&header.schema);
                println!("  op {i}: {}", truncate(&line, args.truncate_data));
            }
        }
        Err(e) => println!("  undecodable row operations: {e}"),
    }
}

fn display_op_id(op_id: Option<oplog::OpId>) -> String {
    op_id.map_or_else(|| "none".to_string(), |id| id.to_string())
}

fn truncate(text: &str, limit: usize) -> String {
    if limit == 0 || text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit).collect();
    format!("{kept}...")
}
