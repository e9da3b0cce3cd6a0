use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use fmi_accel::buffer::{SearchBuffer, Shape};
use fmi_accel::config::FmiConfig;
use fmi_accel::device::{HostSearchKernel, Kernel, MemorySpace, Operation, SimDevice};
use fmi_accel::index::{table, FmiTable, IndexMeta, PackedIndex, SaInterval};
use fmi_accel::replica::DeviceIndex;
use fmi_accel::util::dna;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(
    name = "fmi-accel",
    author,
    version,
    about = "FM-index backward search with an FMI lookup table",
    arg_required_else_help = true
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Worker threads for packing and table construction (0 = all cores)
    #[arg(short = 't', long = "threads", default_value_t = 0, global = true)]
    threads: usize,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pack an ASCII BWT (A/C/G/T, `$` sentinel, others = N) into an index file
    Pack {
        /// BWT text file
        bwt: PathBuf,
        /// Output packed index
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Build the FMI lookup table for a packed index
    Table {
        #[arg(short = 'i', long = "index")]
        index: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = table::DEFAULT_LEVELS)]
        levels: u32,
        /// Levels resolved by table lookup during search (default: min(10, levels - 1))
        #[arg(long)]
        skip: Option<u32>,
    },
    /// Print the header and level offsets of an FMI table file
    Info {
        table: PathBuf,
    },
    /// Search exact patterns on simulated accelerator devices
    Search {
        #[arg(short = 'i', long = "index")]
        index: PathBuf,
        /// FMI table file; plain backward search if omitted
        #[arg(long = "table")]
        table: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        devices: usize,
        /// Memory per simulated device (MiB)
        #[arg(long = "device-mem", default_value_t = 1024)]
        device_mem: u64,
        /// Devices access host memory directly instead of owning copies
        #[arg(long = "host-mapped")]
        host_mapped: bool,
        /// Patterns (A/C/G/T; any other character never matches)
        #[arg(required = true)]
        patterns: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    if cli.threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global() {
            log::warn!("cannot configure {} threads: {}", cli.threads, e);
        }
    }

    match cli.command {
        Commands::Pack { bwt, output } => run_pack(&bwt, &output),
        Commands::Table { index, output, levels, skip } => run_table(&index, &output, levels, skip),
        Commands::Info { table } => run_info(&table),
        Commands::Search { index, table, devices, device_mem, host_mapped, patterns } => {
            let config = FmiConfig { num_devices: devices, ..Default::default() };
            config.validate()?;
            let space = if host_mapped { MemorySpace::HostMapped } else { MemorySpace::DeviceMapped };
            run_search(&index, table.as_deref(), &config, device_mem << 20, space, &patterns)
        }
    }
}

fn run_pack(bwt_path: &Path, output: &Path) -> Result<()> {
    let raw = std::fs::read(bwt_path).with_context(|| format!("cannot read BWT '{}'", bwt_path.display()))?;
    let bwt: Vec<u8> = raw.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
    if bwt.is_empty() {
        anyhow::bail!("BWT file '{}' is empty", bwt_path.display());
    }

    let mut idx = PackedIndex::from_ascii_bwt(&bwt);
    idx.set_meta(IndexMeta {
        source_file: Some(bwt_path.display().to_string()),
        build_args: Some(std::env::args().collect::<Vec<_>>().join(" ")),
        build_timestamp: Some(chrono::Utc::now().to_rfc3339()),
    });
    idx.save_to_file(output)
        .with_context(|| format!("cannot write index to '{}'", output.display()))?;

    println!("bwt_len: {}", idx.bwt_len);
    println!("entries: {}", idx.entries.len());
    println!("cumulative: {:?}", idx.cumulative);
    println!("packed index saved: {}", output.display());
    Ok(())
}

fn run_table(index: &Path, output: &Path, levels: u32, skip: Option<u32>) -> Result<()> {
    let idx = PackedIndex::load_from_file(index)
        .with_context(|| format!("cannot load index '{}'", index.display()))?;
    let skip = skip.unwrap_or_else(|| table::DEFAULT_SKIP_LEVELS.min(levels.saturating_sub(1)));
    let config = FmiConfig { table_levels: levels, skip_levels: skip, ..Default::default() };
    config.validate()?;
    let table = FmiTable::build(&idx, config.table_levels, config.skip_levels)?;
    table
        .save_to_file(output)
        .with_context(|| format!("cannot write table to '{}'", output.display()))?;
    println!(
        "FMI table saved: {} (levels {}, skip {}, {} elements, {} bytes)",
        output.display(),
        table.max_levels(),
        table.skip_levels(),
        table.total_elements(),
        table.size_in_bytes()
    );
    Ok(())
}

fn run_info(path: &Path) -> Result<()> {
    let table = FmiTable::load_from_file(path).with_context(|| format!("cannot load table '{}'", path.display()))?;
    println!("max_levels: {}", table.max_levels());
    println!("skip_levels: {}", table.skip_levels());
    println!("total_elements: {}", table.total_elements());
    println!("bytes: {}", table.size_in_bytes());
    for (level, off) in table.offsets.iter().enumerate() {
        println!("level {:>2}: init {:>10} top {:>10}", level, off.init, off.top);
    }
    Ok(())
}

fn run_search(
    index: &Path,
    table_path: Option<&Path>,
    config: &FmiConfig,
    device_bytes: u64,
    space: MemorySpace,
    patterns: &[String],
) -> Result<()> {
    let idx = Arc::new(
        PackedIndex::load_from_file(index).with_context(|| format!("cannot load index '{}'", index.display()))?,
    );
    let table = match table_path {
        Some(p) => Some(Arc::new(
            FmiTable::load_from_file(p).with_context(|| format!("cannot load table '{}'", p.display()))?,
        )),
        None => None,
    };

    let kernel: Arc<dyn Kernel> = Arc::new(HostSearchKernel::new(Arc::clone(&idx), table.as_ref().map(Arc::clone)));
    let devices: Vec<Arc<SimDevice>> = (0..config.num_devices)
        .map(|id| {
            let device = SimDevice::new(id as u32, device_bytes, space);
            Arc::new(device.with_kernel(Operation::Search, Arc::clone(&kernel)))
        })
        .collect();
    let mut replicas = DeviceIndex::new(devices.clone(), Arc::clone(&idx), table.as_ref().map(Arc::clone), None);
    replicas.transfer()?;

    let encoded: Vec<Vec<u8>> = patterns.iter().map(|p| dna::encode_seq(p.as_bytes())).collect();
    let per_device = encoded.len().div_ceil(devices.len()).max(1);
    let avg = encoded.iter().map(Vec::len).sum::<usize>().div_ceil(encoded.len().max(1));

    // 先向所有设备提交，再依次等待
    let mut buffers = Vec::with_capacity(devices.len());
    for (device, batch) in devices.iter().zip(encoded.chunks(per_device)) {
        let mut buf = SearchBuffer::new(Arc::clone(device), config.buffer, Shape::new(avg, 1))?;
        let n = buf.load_patterns(batch)?;
        let bases = batch.iter().map(Vec::len).sum();
        buf.send(bases, n)?;
        buffers.push((buf, n));
    }
    let mut results: Vec<SaInterval> = Vec::with_capacity(encoded.len());
    for (buf, n) in &mut buffers {
        buf.receive()?;
        results.extend_from_slice(&buf.intervals()?[..*n]);
    }

    for (pattern, hit) in patterns.iter().zip(&results) {
        println!("{}\t{}\t{}\t{}", pattern, hit.low, hit.high, hit.len());
    }
    drop(buffers);
    replicas.teardown()?;
    Ok(())
}
