//! parz - parallel gzip compression
//!
//! A gzip-compatible compressor that splits the input into fixed-size blocks
//! and compresses them concurrently, one gzip member per block, plus a
//! streaming decompressor that handles the resulting multi-member streams.

use std::env;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

mod cli;
mod codec;
mod compression;
mod decompression;
mod error;
mod gzip;
mod scheduler;
mod stream_decode;

use cli::ParzArgs;
use error::ParzError;

const VERSION: &str = concat!("parz ", env!("CARGO_PKG_VERSION"));

/// Track the current output file so signal handlers can clean it up.
/// When set, an incomplete output file exists that should be deleted on abort.
static OUTPUT_FILE: Mutex<Option<String>> = Mutex::new(None);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Set the current output file path for signal handler cleanup.
pub fn set_output_file(path: Option<String>) {
    if let Ok(mut guard) = OUTPUT_FILE.lock() {
        *guard = path;
    }
}

fn install_signal_handlers() {
    unsafe {
        // SIGINT (Ctrl-C), SIGTERM, SIGHUP: clean up and exit
        for &sig in &[libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
            libc::signal(sig, signal_handler as *const () as libc::sighandler_t);
        }
        // SIGPIPE: exit quietly (e.g., piping to head)
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

extern "C" fn signal_handler(sig: libc::c_int) {
    // Mark as interrupted (atomic, signal-safe)
    INTERRUPTED.store(true, Ordering::SeqCst);

    // Try to clean up the output file.
    // Mutex::lock may not be signal-safe, but try_lock is better.
    // In the worst case we just skip cleanup.
    if let Ok(guard) = OUTPUT_FILE.try_lock() {
        if let Some(ref path) = *guard {
            let _ = std::fs::remove_file(path);
        }
    }

    // Restore default handler and re-raise so parent sees correct signal
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}

fn main() {
    install_signal_handlers();

    match run() {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("parz: {}", e);
            process::exit(1);
        }
    }
}

fn run() -> Result<i32, ParzError> {
    let args = ParzArgs::parse()?;

    if args.version {
        println!("{}", VERSION);
        return Ok(0);
    }

    if args.help {
        cli::print_help();
        return Ok(0);
    }

    // Support unparz/zcat-style symlinks
    let program_path = env::args().next().unwrap_or_else(|| "parz".to_string());
    let program_name = Path::new(&program_path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("parz");

    let mut args = args;
    if program_name.contains("unparz") || program_name.contains("gunzip") {
        args.decompress = true;
    }
    if program_name == "zcat" || program_name == "gzcat" {
        args.decompress = true;
        args.stdout = true;
    }
    // --test implies decompress mode
    if args.test {
        args.decompress = true;
    }

    // Refuse to write compressed binary data to a terminal (unless -f)
    if !args.decompress && args.stdout && !args.force {
        use std::io::IsTerminal;
        if std::io::stdout().is_terminal() {
            eprintln!("parz: compressed data not written to a terminal. Use -f to force.");
            return Ok(1);
        }
    }

    let mut exit_code = 0;

    if args.files.is_empty() {
        // No files: stdin to stdout
        if args.decompress {
            exit_code = decompression::decompress_stdin(&args)?;
        } else {
            if !args.stdout && !args.force {
                use std::io::IsTerminal;
                if std::io::stdout().is_terminal() {
                    eprintln!("parz: compressed data not written to a terminal. Use -f to force.");
                    return Ok(1);
                }
            }
            exit_code = compression::compress_stdin(&args)?;
        }
        return Ok(exit_code);
    }

    for file in &args.files {
        let result = if args.decompress {
            decompression::decompress_file(file, &args)
        } else {
            compression::compress_file(file, &args)
        };

        match result {
            Ok(code) => {
                if code != 0 {
                    exit_code = code;
                }
            }
            Err(e) => {
                eprintln!("parz: {}: {}", file, e);
                exit_code = 1;
            }
        }

        if INTERRUPTED.load(Ordering::SeqCst) {
            break;
        }
    }

    Ok(exit_code)
}
