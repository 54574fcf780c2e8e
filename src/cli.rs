//! gzip-style command line parsing.
//!
//! Hand-rolled over `env::args` so combined short flags (`-dc`), attached
//! values (`-p8`, `-b512`) and numeric level shortcuts (`-1` .. `-12`) all
//! behave the way gzip and pigz users expect. Configuration errors are
//! rejected here, before anything is opened or started.

use crate::codec::{DEFAULT_LEVEL, MAX_LEVEL};
use crate::error::{ParzError, ParzResult};
use crate::scheduler::DEFAULT_BLOCK_SIZE;

#[derive(Debug, Clone)]
pub struct ParzArgs {
    pub decompress: bool,
    pub stdout: bool,
    pub keep: bool,
    pub force: bool,
    pub test: bool,
    pub recursive: bool,
    pub quiet: bool,
    pub verbosity: u8,
    pub no_name: bool,
    /// Worker thread count; 0 = all available hardware threads
    pub processes: usize,
    pub compression_level: u32,
    /// Bytes per worker per wave
    pub block_size: usize,
    pub suffix: String,
    pub help: bool,
    pub version: bool,
    pub files: Vec<String>,
}

impl Default for ParzArgs {
    fn default() -> Self {
        Self {
            decompress: false,
            stdout: false,
            keep: false,
            force: false,
            test: false,
            recursive: false,
            quiet: false,
            verbosity: 0,
            no_name: false,
            processes: 0,
            compression_level: DEFAULT_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
            suffix: ".gz".to_string(),
            help: false,
            version: false,
            files: Vec::new(),
        }
    }
}

impl ParzArgs {
    pub fn parse() -> ParzResult<Self> {
        Self::parse_from(std::env::args().skip(1))
    }

    pub fn parse_from<I>(args: I) -> ParzResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = ParzArgs::default();
        let mut iter = args.into_iter().peekable();
        let mut positional_only = false;

        while let Some(arg) = iter.next() {
            if positional_only || arg == "-" || !arg.starts_with('-') {
                parsed.files.push(arg);
                continue;
            }

            if arg == "--" {
                positional_only = true;
                continue;
            }

            if let Some(long) = arg.strip_prefix("--") {
                let (name, attached) = match long.split_once('=') {
                    Some((n, v)) => (n, Some(v.to_string())),
                    None => (long, None),
                };
                match name {
                    "decompress" | "uncompress" => parsed.decompress = true,
                    "stdout" | "to-stdout" => parsed.stdout = true,
                    "keep" => parsed.keep = true,
                    "force" => parsed.force = true,
                    "test" => parsed.test = true,
                    "recursive" => parsed.recursive = true,
                    "quiet" => parsed.quiet = true,
                    "verbose" => parsed.verbosity += 1,
                    "no-name" => parsed.no_name = true,
                    "help" => parsed.help = true,
                    "version" => parsed.version = true,
                    "fast" => parsed.compression_level = 1,
                    "best" => parsed.compression_level = 9,
                    "level" => {
                        parsed.compression_level =
                            parse_level(&take_value(name, attached, &mut iter)?)?;
                    }
                    "processes" | "threads" => {
                        parsed.processes =
                            parse_threads(&take_value(name, attached, &mut iter)?)?;
                    }
                    "blocksize" => {
                        parsed.block_size =
                            parse_block_size(&take_value(name, attached, &mut iter)?)?;
                    }
                    "suffix" => {
                        parsed.suffix = take_value(name, attached, &mut iter)?;
                    }
                    _ => {
                        return Err(ParzError::invalid_argument(format!(
                            "unknown option --{}",
                            name
                        )));
                    }
                }
                continue;
            }

            // Numeric shortcut: -0 .. -12
            let body = &arg[1..];
            if body.chars().all(|c| c.is_ascii_digit()) {
                parsed.compression_level = parse_level(body)?;
                continue;
            }

            // Short flags, possibly combined; -p/-b/-S/-l take a value that
            // may be attached or the next argument.
            let mut chars = body.char_indices();
            while let Some((pos, flag)) = chars.next() {
                match flag {
                    'd' => parsed.decompress = true,
                    'c' => parsed.stdout = true,
                    'k' => parsed.keep = true,
                    'f' => parsed.force = true,
                    't' => parsed.test = true,
                    'r' => parsed.recursive = true,
                    'q' => parsed.quiet = true,
                    'v' => parsed.verbosity += 1,
                    'n' => parsed.no_name = true,
                    'h' => parsed.help = true,
                    'V' => parsed.version = true,
                    'p' | 'b' | 'S' | 'l' => {
                        let rest = &body[pos + flag.len_utf8()..];
                        let value = if rest.is_empty() {
                            iter.next().ok_or_else(|| {
                                ParzError::invalid_argument(format!(
                                    "option -{} requires a value",
                                    flag
                                ))
                            })?
                        } else {
                            rest.to_string()
                        };
                        match flag {
                            'p' => parsed.processes = parse_threads(&value)?,
                            'b' => parsed.block_size = parse_block_size(&value)?,
                            'S' => parsed.suffix = value,
                            _ => parsed.compression_level = parse_level(&value)?,
                        }
                        break;
                    }
                    _ => {
                        return Err(ParzError::invalid_argument(format!(
                            "unknown option -{}",
                            flag
                        )));
                    }
                }
            }
        }

        if parsed.suffix.is_empty() {
            return Err(ParzError::invalid_argument("suffix must not be empty"));
        }

        Ok(parsed)
    }
}

fn take_value<I>(
    name: &str,
    attached: Option<String>,
    iter: &mut std::iter::Peekable<I>,
) -> ParzResult<String>
where
    I: Iterator<Item = String>,
{
    match attached {
        Some(v) => Ok(v),
        None => iter
            .next()
            .ok_or_else(|| ParzError::invalid_argument(format!("option --{} requires a value", name))),
    }
}

fn parse_level(value: &str) -> ParzResult<u32> {
    let level: u32 = value
        .parse()
        .map_err(|_| ParzError::invalid_argument(format!("invalid level '{}'", value)))?;
    if level > MAX_LEVEL {
        return Err(ParzError::InvalidLevel(level));
    }
    Ok(level)
}

fn parse_threads(value: &str) -> ParzResult<usize> {
    value
        .parse()
        .map_err(|_| ParzError::InvalidThreads(format!("'{}'", value)))
}

/// Block size is given in KiB on the command line, like pigz -b.
fn parse_block_size(value: &str) -> ParzResult<usize> {
    let kib: usize = value
        .parse()
        .map_err(|_| ParzError::InvalidBlockSize(format!("'{}'", value)))?;
    if kib == 0 {
        return Err(ParzError::InvalidBlockSize(
            "block size must be at least 1 KiB".to_string(),
        ));
    }
    kib.checked_mul(1024)
        .ok_or_else(|| ParzError::InvalidBlockSize(format!("{} KiB overflows", kib)))
}

pub fn print_help() {
    println!("Usage: parz [OPTION]... [FILE]...");
    println!("Compress or decompress FILEs in parallel (by default, compress in place).");
    println!();
    println!("  -d, --decompress   decompress instead of compress");
    println!("  -c, --stdout       write to standard output, keep input files");
    println!("  -k, --keep         keep input files");
    println!("  -f, --force        overwrite existing output files");
    println!("  -t, --test         test compressed file integrity");
    println!("  -r, --recursive    recurse into directories");
    println!("  -q, --quiet        suppress warnings");
    println!("  -v, --verbose      print compression statistics");
    println!("  -n, --no-name      do not store file name and timestamp");
    println!("  -p, --processes N  use N worker threads (0 = all cores)");
    println!("  -b, --blocksize N  block size per worker in KiB (default 128)");
    println!("  -S, --suffix SUF   use suffix SUF instead of .gz");
    println!("  -0 .. -12          compression level (0 = store, default 6)");
    println!("  -h, --help         print this help");
    println!("  -V, --version      print version");
    println!();
    println!("With no FILE, or when FILE is -, read standard input.");
}
