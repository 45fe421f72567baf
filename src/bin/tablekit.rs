use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use rand::{prelude::*, rngs::StdRng};
use std::fs;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use strum::{Display, EnumString};
use tablekit::merge::func;
use tablekit::{
    varint, Compression, Direction, MergeFn, Merger, Reader, Sorter, SorterOptions, TableIter,
    Writer, WriterOptions,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const REPORT_INTERVAL: u64 = 1_000_000;
const MEGABYTE: f64 = 1024.0 * 1024.0;

#[derive(Parser)]
#[command(about = "Build, inspect, sort and merge sorted key-value tables")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Writes a table of zero-padded sequential keys, about half of them present
    Gen {
        path: PathBuf,
        max_keys: u64,
        #[command(flatten)]
        table: TableArgs,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Random point lookups against a table made by `gen`
    Search {
        path: PathBuf,
        max_keys: u64,
        iterations: u64,
    },
    /// Prints entries as key<TAB>value lines
    Dump {
        path: PathBuf,
        /// Start at the first key >= this one (<= with --backward)
        #[arg(long)]
        from: Option<String>,
        #[arg(long, conflicts_with = "from")]
        prefix: Option<String>,
        #[arg(long, conflicts_with = "prefix")]
        backward: bool,
        /// Decode values as varint counters
        #[arg(long)]
        varint: bool,
    },
    /// Prints the value stored under a key
    Get { path: PathBuf, key: String },
    /// Prints table metadata and its block index
    Info {
        path: PathBuf,
        #[arg(long)]
        blocks: bool,
    },
    /// Merges tables into a new one
    Merge {
        output: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long, default_value_t = Reduce::Concat)]
        reduce: Reduce,
        #[command(flatten)]
        table: TableArgs,
    },
    /// Sorts key<TAB>value lines (stdin when no input is given) into a table
    Sort {
        output: PathBuf,
        input: Option<PathBuf>,
        #[arg(long, default_value_t = Reduce::Last)]
        reduce: Reduce,
        #[command(flatten)]
        sort: SortArgs,
        #[command(flatten)]
        table: TableArgs,
    },
    /// Counts words of a text file into a table of varint counters
    Wordfreq {
        input: PathBuf,
        output: PathBuf,
        /// Count only the body of a Project Gutenberg ebook, without its license
        /// header and footer. Otherwise the whole file is counted.
        #[arg(long)]
        gutenberg: bool,
        #[command(flatten)]
        sort: SortArgs,
        #[command(flatten)]
        table: TableArgs,
    },
}

#[derive(clap::Args)]
struct TableArgs {
    #[arg(long, default_value_t = Compression::Snappy)]
    compression: Compression,
    #[arg(long, default_value_t = 8 * 1024)]
    block_size: usize,
}

impl TableArgs {
    fn options(&self) -> WriterOptions {
        WriterOptions::default()
            .compression(self.compression)
            .block_size(self.block_size)
    }
}

#[derive(clap::Args)]
struct SortArgs {
    /// Memory budget of the sorter in megabytes
    #[arg(long, default_value_t = 1024)]
    max_memory_mb: usize,
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

impl SortArgs {
    fn options(&self) -> SorterOptions {
        let options = SorterOptions::default().max_memory(self.max_memory_mb * 1024 * 1024);
        match &self.temp_dir {
            Some(dir) => options.temp_dir(dir),
            None => options,
        }
    }
}

/// How values under the same key are combined.
#[derive(Debug, Clone, Copy, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Reduce {
    Concat,
    /// Concatenation with a space in between.
    Space,
    First,
    Last,
    /// Sum of varint counters.
    Sum,
}

impl Reduce {
    fn function(self) -> MergeFn {
        match self {
            Reduce::Concat => Box::new(func::concat),
            Reduce::Space => Box::new(func::concat_with(" ")),
            Reduce::First => Box::new(func::keep_first),
            Reduce::Last => Box::new(func::keep_last),
            Reduce::Sum => Box::new(func::varint_sum),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Gen {
            path,
            max_keys,
            table,
            seed,
        } => generate(&path, max_keys, table.options(), seed),
        Command::Search {
            path,
            max_keys,
            iterations,
        } => search(&path, max_keys, iterations),
        Command::Dump {
            path,
            from,
            prefix,
            backward,
            varint,
        } => {
            let reader = open(&path)?;
            let direction = if backward {
                Direction::Backward
            } else {
                Direction::Forward
            };
            let iter = match prefix {
                Some(prefix) => reader.prefix(prefix.as_bytes()),
                None => reader.iterate(from.as_deref().map(str::as_bytes), direction),
            };
            dump(iter, varint)
        }
        Command::Get { path, key } => {
            let reader = open(&path)?;
            match reader.get(key.as_bytes())? {
                Some(value) => {
                    let mut out = io::stdout().lock();
                    out.write_all(&value)?;
                    out.write_all(b"\n")?;
                    Ok(())
                }
                None => bail!("key {key:?} not found"),
            }
        }
        Command::Info { path, blocks } => print_info(&path, blocks),
        Command::Merge {
            output,
            inputs,
            reduce,
            table,
        } => {
            let mut merger = Merger::new(reduce.function());
            for input in &inputs {
                merger.add_reader(&open(input)?);
            }
            let mut writer = create(&output, table.options())?;
            let written = merger.write(&mut writer)?;
            writer.finalize()?;
            info!(inputs = inputs.len(), entries = written, "merged");
            Ok(())
        }
        Command::Sort {
            output,
            input,
            reduce,
            sort,
            table,
        } => {
            let mut sorter = Sorter::new(sort.options(), reduce.function());
            let lines: Box<dyn BufRead> = match &input {
                Some(path) => Box::new(io::BufReader::new(
                    fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
                )),
                None => Box::new(io::stdin().lock()),
            };
            for (n, line) in lines.lines().enumerate() {
                let line = line?;
                let Some((key, value)) = line.split_once('\t') else {
                    bail!("line {}: expected key<TAB>value", n + 1);
                };
                sorter
                    .put(key.to_string(), value.to_string())
                    .with_context(|| format!("line {}", n + 1))?;
            }
            write_sorted(sorter, &output, table.options())
        }
        Command::Wordfreq {
            input,
            output,
            gutenberg,
            sort,
            table,
        } => {
            let text = fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let body = if gutenberg {
                gutenberg_body(&text)
                    .with_context(|| format!("{} is not a Gutenberg ebook", input.display()))?
            } else {
                text
            };
            let mut sorter = Sorter::new(sort.options(), func::varint_sum);
            let one = Bytes::from(varint::encode(1));
            for word in words(&body) {
                sorter.put(word, one.clone())?;
            }
            write_sorted(sorter, &output, table.options())
        }
    }
}

fn open(path: &Path) -> Result<Reader> {
    Reader::open(path).with_context(|| format!("opening table {}", path.display()))
}

fn create(path: &Path, options: WriterOptions) -> Result<Writer> {
    Writer::create(path, options).with_context(|| format!("creating table {}", path.display()))
}

fn generate(path: &Path, max_keys: u64, options: WriterOptions, seed: Option<u64>) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut writer = create(path, options)?;

    let start = Instant::now();
    let mut bytes = 0;
    for n in 1..=max_keys {
        if rng.random_bool(0.5) {
            let key = format!("{n:010}");
            let letter = b'a' + rng.random_range(0..26u8);
            let value = vec![letter; rng.random_range(1..=50usize)];
            bytes += key.len() + value.len();
            writer.add(key, value)?;
        }
        if n % REPORT_INTERVAL == 0 {
            info!(
                keys = n,
                megabytes = bytes as f64 / MEGABYTE,
                secs = start.elapsed().as_secs_f64(),
                "generating"
            );
        }
    }
    writer.finalize()?;

    let secs = start.elapsed().as_secs_f64();
    info!(
        entries = writer.len(),
        megabytes = bytes as f64 / MEGABYTE,
        secs,
        per_sec = (max_keys as f64 / secs) as u64,
        "generated"
    );

    Ok(())
}

fn search(path: &Path, max_keys: u64, iterations: u64) -> Result<()> {
    let reader = open(path)?;
    let mut rng = StdRng::from_os_rng();

    let start = Instant::now();
    let mut found = 0u64;
    for n in 1..=iterations {
        let key = format!("{:010}", rng.random_range(0..=max_keys));
        if reader.get(key.as_bytes())?.is_some() {
            found += 1;
        }
        if n % REPORT_INTERVAL == 0 {
            info!(lookups = n, found, secs = start.elapsed().as_secs_f64(), "searching");
        }
    }

    let secs = start.elapsed().as_secs_f64();
    info!(
        lookups = iterations,
        found,
        secs,
        per_sec = (iterations as f64 / secs) as u64,
        "searched"
    );

    Ok(())
}

fn dump(iter: TableIter, as_varint: bool) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for entry in iter {
        let (key, value) = entry?;
        out.write_all(&key)?;
        out.write_all(b"\t")?;
        if as_varint {
            let (count, _) = varint::decode(&value)?;
            write!(out, "{count}")?;
        } else {
            out.write_all(&value)?;
        }
        out.write_all(b"\n")?;
    }
    out.flush()?;

    Ok(())
}

fn print_info(path: &Path, blocks: bool) -> Result<()> {
    let reader = open(path)?;
    let file_size = fs::metadata(path)?.len();

    let mut out = io::stdout().lock();
    writeln!(out, "file:        {}", path.display())?;
    writeln!(out, "file size:   {file_size}")?;
    writeln!(out, "entries:     {}", reader.len())?;
    writeln!(out, "blocks:      {}", reader.block_count())?;
    writeln!(out, "compression: {}", reader.compression())?;
    writeln!(out, "data size:   {}", reader.data_size())?;
    writeln!(out, "index size:  {}", reader.trailer().index_length)?;
    if reader.data_size() > 0 {
        writeln!(
            out,
            "ratio:       {:.3}",
            reader.trailer().index_offset as f64 / reader.data_size() as f64
        )?;
    }

    if blocks {
        for (i, entry) in reader.index_entries().iter().enumerate() {
            writeln!(
                out,
                "block {i}: offset {} length {} first key {:?}",
                entry.offset,
                entry.length,
                String::from_utf8_lossy(&entry.first_key)
            )?;
        }
    }

    Ok(())
}

fn write_sorted(sorter: Sorter, output: &Path, options: WriterOptions) -> Result<()> {
    let mut writer = create(output, options)?;
    sorter.finish(&mut writer)?;
    writer.finalize()?;
    Ok(())
}

/// Lowercased words with surrounding punctuation removed.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| c.is_ascii_punctuation()).to_lowercase())
        .filter(|word| !word.is_empty())
}

/// Lines after the start marker of the ebook (and the few title lines that
/// follow it) up to the end marker or the end of the file.
fn gutenberg_body(text: &str) -> Result<String> {
    const TITLE_LINES: usize = 5;

    let mut lines = text.lines();
    if !lines.any(|line| line.starts_with("*** START OF TH")) {
        bail!("no start marker");
    }

    let body: Vec<&str> = lines
        .skip(TITLE_LINES)
        .take_while(|line| {
            !line.starts_with("End of the Project Gutenberg EBook")
                && !line.starts_with("*** END OF TH")
        })
        .collect();

    Ok(body.join("\n"))
}
