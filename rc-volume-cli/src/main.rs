use clap::{Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use rc_volume::{EntryKind, ReadAtReader, Tunables, Volume, ZipCodec};
use tracing_subscriber::EnvFilter;

use std::{
    borrow::Cow,
    io::{self, Write},
    path::PathBuf,
    time::{Duration, Instant},
};

#[derive(Parser)]
struct Cli {
    /// Capacity of the decompression buffer, in bytes
    #[arg(long, global = true)]
    buffer: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List entries
    Ls {
        zipfile: PathBuf,

        #[arg(short, long)]
        verbose: bool,
    },
    /// Print a byte range of an entry to stdout
    Cat {
        zipfile: PathBuf,
        name: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Defaults to the rest of the entry
        #[arg(long)]
        length: Option<u64>,
    },
    /// Decode every entry, verifying sizes and checksums
    Check {
        zipfile: PathBuf,

        /// Size of each read, in bytes
        #[arg(long, default_value_t = 64 * 1024)]
        chunk: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = do_main(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn do_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut tunables = Tunables::default();
    if let Some(capacity) = cli.buffer {
        tunables = tunables.decompress_buffer_capacity(capacity);
    }
    let open = |path: &PathBuf| -> Result<Volume<ReadAtReader<std::fs::File>>, rc_volume::Error> {
        Volume::open(ReadAtReader::open(path)?, ZipCodec::default(), tunables.clone())
    };

    match cli.command {
        Commands::Ls { zipfile, verbose } => {
            let mut volume = open(&zipfile)?;

            let mut stats = Stats::default();
            for entry in volume.list_entries()? {
                stats.inc_by_kind(entry.kind);
                stats.uncompressed_size += entry.size;

                print!(
                    "{kind:>4} {size:>12} {name}",
                    kind = match entry.kind {
                        EntryKind::File => "file",
                        EntryKind::Directory => "dir",
                    },
                    size = format_size(entry.size, BINARY),
                    name = if verbose {
                        Cow::Borrowed(&entry.name)
                    } else {
                        Cow::Owned(entry.name.truncate_path(55))
                    },
                );
                if verbose {
                    print!(" {modified}", modified = entry.modified);
                }
                println!();
            }
            println!(
                "{} in {} files, {} dirs",
                format_size(stats.uncompressed_size, BINARY),
                stats.num_files,
                stats.num_dirs,
            );
            volume.shutdown()?;
        }
        Commands::Cat {
            zipfile,
            name,
            offset,
            length,
        } => {
            let mut volume = open(&zipfile)?;
            let handle = volume.open_entry(&name)?;
            let size = volume.entry(handle)?.size;
            let end = match length {
                Some(length) => offset.saturating_add(length).min(size),
                None => size,
            };

            let stdout = io::stdout();
            let mut out = stdout.lock();
            let mut pos = offset;
            while pos < end {
                let want = (end - pos).min(64 * 1024) as usize;
                let bytes = volume.read_entry(handle, pos, want)?;
                if bytes.is_empty() {
                    break;
                }
                out.write_all(&bytes)?;
                pos += bytes.len() as u64;
                volume.prefetch();
            }
            out.flush()?;

            volume.close_entry(handle)?;
            volume.shutdown()?;
        }
        Commands::Check { zipfile, chunk } => {
            let mut volume = open(&zipfile)?;
            let entries = volume.list_entries()?.to_vec();
            let total = entries.iter().map(|entry| entry.size).sum::<u64>();

            let pbar = ProgressBar::new(total);
            pbar.set_style(
                ProgressStyle::default_bar()
                    .template("{eta_precise} [{bar:20.cyan/blue}] {wide_msg}")?
                    .progress_chars("=>-"),
            );
            pbar.enable_steady_tick(Duration::from_millis(125));

            let start_time = Instant::now();
            let mut failures = 0;
            // closing the last handle would send the engine back to the
            // start of the archive, so they're all closed at the end
            let mut handles = Vec::new();
            for entry in entries.iter().filter(|entry| !entry.is_dir()) {
                pbar.set_message(entry.name.clone());
                let handle = volume.open_entry(&entry.name)?;

                let mut pos = 0;
                loop {
                    match volume.read_entry(handle, pos, chunk.max(1)) {
                        Ok(bytes) if bytes.is_empty() => break,
                        Ok(bytes) => {
                            pos += bytes.len() as u64;
                            pbar.inc(bytes.len() as u64);
                        }
                        Err(e) => {
                            pbar.println(format!("{}: {e}", entry.name));
                            failures += 1;
                            break;
                        }
                    }
                }
                handles.push(handle);
            }
            pbar.finish();
            for handle in handles {
                volume.close_entry(handle)?;
            }

            let duration = start_time.elapsed();
            let stats = volume.engine().stats();
            println!(
                "Checked {} in {} entries, {} failed",
                format_size(total, BINARY),
                entries.len(),
                failures
            );
            println!(
                "{} replays, {} discarded, header cache: {} hits / {} misses ({})",
                stats.replays,
                format_size(stats.discarded_bytes, BINARY),
                stats.cache.hits,
                stats.cache.misses,
                format_size(stats.cache.bytes, BINARY),
            );
            let seconds = duration.as_secs_f64().max(0.001);
            let bps = (total as f64 / seconds) as u64;
            println!("Overall decode speed: {} / s", format_size(bps, BINARY));

            volume.shutdown()?;
            if failures > 0 {
                return Err(format!("{failures} entries failed verification").into());
            }
        }
    }

    Ok(())
}

trait Truncate {
    fn truncate_path(&self, limit: usize) -> String;
}

impl Truncate for String {
    /// Abbreviates leading path components to their first character until
    /// the path fits, then cuts it short.
    fn truncate_path(&self, limit: usize) -> String {
        let mut name_tokens: Vec<&str> = Vec::new();
        let mut rest_tokens: std::collections::VecDeque<&str> = self.split('/').collect();
        loop {
            let len_separators = name_tokens.len() + rest_tokens.len() - 1;
            let len_strings = name_tokens.iter().map(|x| x.len()).sum::<usize>()
                + rest_tokens.iter().map(|x| x.len()).sum::<usize>();
            if len_separators + len_strings < limit {
                name_tokens.extend(rest_tokens);
                break name_tokens.join("/");
            }
            let Some(token) = rest_tokens.pop_front() else {
                let name = name_tokens.join("/");
                break name.chars().take(limit - 3).collect::<String>() + "...";
            };
            match token.char_indices().nth(1) {
                Some((i, _)) => name_tokens.push(&token[..i]),
                None => name_tokens.push(token),
            }
        }
    }
}

#[derive(Default)]
struct Stats {
    num_files: u32,
    num_dirs: u32,
    uncompressed_size: u64,
}

impl Stats {
    fn inc_by_kind(&mut self, kind: EntryKind) {
        match kind {
            EntryKind::File => self.num_files += 1,
            EntryKind::Directory => self.num_dirs += 1,
        }
    }
}
