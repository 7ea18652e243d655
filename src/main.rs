use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use prettytable::{Table, row};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pagedb::{
    BTreeIndex, BufferManager, ConfigError, Datatype, FileError, FileManager, IndexError,
    KeyOrder, Operator, RecordError, RecordId, StorageConfig, create_relation,
};

/// Relation size used by the reference scenario
const REFERENCE_SIZE: usize = 5000;

/// (low, low_op, high, high_op, expected matches over keys 0..5000)
const REFERENCE_QUERIES: [(i32, Operator, i32, Operator, usize); 7] = [
    (25, Operator::Gt, 40, Operator::Lt, 14),
    (20, Operator::Gte, 35, Operator::Lte, 16),
    (-3, Operator::Gt, 3, Operator::Lt, 3),
    (996, Operator::Gt, 1001, Operator::Lt, 4),
    (0, Operator::Gt, 1, Operator::Lt, 0),
    (300, Operator::Gt, 400, Operator::Lt, 99),
    (3000, Operator::Gte, 4000, Operator::Lt, 1000),
];

/// Key order accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Forward,
    Backward,
    Random,
}

impl From<OrderArg> for KeyOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Forward => KeyOrder::Forward,
            OrderArg::Backward => KeyOrder::Backward,
            OrderArg::Random => KeyOrder::Random,
        }
    }
}

/// Scan bound operator accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OpArg {
    Lt,
    Lte,
    Gte,
    Gt,
}

impl From<OpArg> for Operator {
    fn from(op: OpArg) -> Self {
        match op {
            OpArg::Lt => Operator::Lt,
            OpArg::Lte => Operator::Lte,
            OpArg::Gte => Operator::Gte,
            OpArg::Gt => Operator::Gt,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Parser)]
#[command(name = "pagedb", about = "Paged storage, buffer pool and B+ tree index")]
struct Cli {
    /// JSON storage configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Buffer pool frames, overriding the configuration
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a relation of fixed-layout tuples
    Relation {
        path: PathBuf,
        #[arg(long)]
        size: usize,
        #[arg(long, default_value_t = 0)]
        start: i32,
        #[arg(long, value_enum, default_value = "forward")]
        order: OrderArg,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Run one range scan over the integer index of a relation
    Scan {
        relation: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        low: i32,
        #[arg(long, value_enum)]
        low_op: OpArg,
        #[arg(long, allow_hyphen_values = true)]
        high: i32,
        #[arg(long, value_enum)]
        high_op: OpArg,
    },
    /// Run the reference scans over forward, backward and random relations
    Reference {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<StorageConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => StorageConfig::load(path)?,
        None => StorageConfig::default(),
    };
    if let Some(pool_size) = cli.pool_size {
        config.pool_size = pool_size;
    }
    Ok(config)
}

/// Returns whether every check passed
fn run(cli: Cli) -> Result<bool, CliError> {
    let config = load_config(&cli)?;
    let mut bm = BufferManager::from_config(&config);

    match cli.command {
        Command::Relation {
            path,
            size,
            start,
            order,
            seed,
        } => {
            let order = KeyOrder::from(order);
            let path = config.data_dir.join(path);
            let pages = build_relation(bm.files_mut(), &path, order.keys(start, size, seed)?)?;
            println!("{}: {size} tuples in {pages} pages ({order})", path.display());
        }
        Command::Scan {
            relation,
            low,
            low_op,
            high,
            high_op,
        } => {
            let (low_op, high_op) = (Operator::from(low_op), Operator::from(high_op));
            let relation = config.data_dir.join(relation);
            let mut index = BTreeIndex::new(&mut bm, &relation, 0, Datatype::Integer)?;
            bm.clear_stats();
            let rids = match index.range_scan(&mut bm, low, low_op, high, high_op) {
                Ok(rids) => rids,
                Err(IndexError::NoSuchKeyFound) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            print_scan(&index, &bm, (low, low_op, high, high_op), &rids);
            index.close(&mut bm)?;
        }
        Command::Reference { dir, seed } => {
            let dir = dir.unwrap_or(config.data_dir);
            return run_reference(&mut bm, &dir, seed);
        }
    }
    Ok(true)
}

/// Write a relation, dropping any index built over an older version of it
fn build_relation<I>(files: &mut FileManager, path: &Path, keys: I) -> Result<usize, CliError>
where
    I: IntoIterator<Item = i32>,
{
    let mut index_name = path.file_name().unwrap_or_default().to_os_string();
    index_name.push(".0");
    match files.remove_file(path.with_file_name(index_name)) {
        Ok(()) | Err(FileError::FileNotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(create_relation(files, path, keys)?)
}

fn print_scan(
    index: &BTreeIndex,
    bm: &BufferManager,
    (low, low_op, high, high_op): (i32, Operator, i32, Operator),
    rids: &[RecordId],
) {
    let stats = bm.stats();
    let first: Vec<String> = rids
        .iter()
        .take(5)
        .map(|rid| format!("({},{})", rid.page_number, rid.slot_number))
        .collect();

    let mut table = Table::new();
    table.add_row(row!["index", index.index_name()]);
    table.add_row(row!["range", format!("{low_op} {low}, {high_op} {high}")]);
    table.add_row(row!["matches", rids.len()]);
    table.add_row(row!["first rids", first.join(" ")]);
    table.add_row(row!["accesses", stats.accesses]);
    table.add_row(row!["disk reads", stats.disk_reads]);
    table.add_row(row!["disk writes", stats.disk_writes]);
    table.printstd();
}

fn run_reference(bm: &mut BufferManager, dir: &Path, seed: u64) -> Result<bool, CliError> {
    let mut table = Table::new();
    table.add_row(row!["order", "range", "expected", "found", "result"]);
    let mut passed = true;

    for order in KeyOrder::ALL {
        let relation = dir.join(format!("relA_{order}"));
        build_relation(bm.files_mut(), &relation, order.keys(0, REFERENCE_SIZE, seed)?)?;
        let mut index = BTreeIndex::new(bm, &relation, 0, Datatype::Integer)?;
        info!(%order, height = index.height(bm)?, "index ready");

        for (low, low_op, high, high_op, expected) in REFERENCE_QUERIES {
            let found = match index.range_scan(bm, low, low_op, high, high_op) {
                Ok(rids) => rids.len(),
                Err(IndexError::NoSuchKeyFound) => 0,
                Err(e) => return Err(e.into()),
            };
            let ok = found == expected;
            passed &= ok;
            table.add_row(row![
                order,
                format!("{low_op} {low}, {high_op} {high}"),
                expected,
                found,
                if ok { "pass" } else { "FAIL" }
            ]);
        }
        index.close(bm)?;
    }

    table.printstd();
    Ok(passed)
}
