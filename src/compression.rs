//! File and stdin compression front end.
//!
//! Everything here is workflow: output naming, overwrite checks, metadata
//! preservation, stats. The actual engine is `scheduler::ParallelCompressor`.

use std::fs::File;
use std::io::{stdin, stdout, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cli::ParzArgs;
use crate::error::{ParzError, ParzResult};
use crate::gzip::MemberHeader;
use crate::scheduler::ParallelCompressor;

/// Buffer size for buffered file handles around the engine.
const FILE_BUFFER_SIZE: usize = 128 * 1024;

pub fn compress_file(filename: &str, args: &ParzArgs) -> ParzResult<i32> {
    if filename == "-" {
        return compress_stdin(args);
    }

    let input_path = Path::new(filename);
    if !input_path.exists() {
        return Err(ParzError::FileNotFound(filename.to_string()));
    }

    if input_path.is_dir() {
        return if args.recursive {
            compress_directory(filename, args)
        } else {
            Err(ParzError::invalid_argument(format!(
                "{} is a directory",
                filename
            )))
        };
    }

    // Refuse to compress an already-suffixed file unless forced
    if !args.force && !args.stdout && filename.ends_with(&args.suffix) {
        if !args.quiet {
            eprintln!(
                "parz: {}: already has {} suffix -- skipping (use -f to force)",
                filename, args.suffix
            );
        }
        return Ok(2);
    }

    let output_path = if args.stdout {
        None
    } else {
        Some(output_filename(input_path, args))
    };

    if let Some(ref output_path) = output_path {
        if output_path.exists() && !args.force {
            return Err(ParzError::invalid_argument(format!(
                "output file {} already exists (use -f to overwrite)",
                output_path.display()
            )));
        }
    }

    let input_file = File::open(input_path)?;
    let file_size = input_file.metadata()?.len();
    let header = build_member_header(input_path, args);

    let mut compressor = ParallelCompressor::with_header(
        args.processes,
        args.compression_level,
        args.block_size,
        header,
    )?;

    if args.verbosity >= 2 {
        eprintln!(
            "parz: compressing {} with {} threads, {} KiB blocks, level {}",
            filename,
            compressor.n_threads(),
            compressor.block_size() / 1024,
            args.compression_level,
        );
    }

    let reader = BufReader::with_capacity(FILE_BUFFER_SIZE, input_file);

    let result = if let Some(ref output_path) = output_path {
        crate::set_output_file(Some(output_path.to_string_lossy().to_string()));
        let writer = BufWriter::with_capacity(FILE_BUFFER_SIZE, File::create(output_path)?);
        compressor.compress_stream(reader, writer)
    } else {
        let stdout = stdout();
        let writer = BufWriter::with_capacity(FILE_BUFFER_SIZE, stdout.lock());
        compressor.compress_stream(reader, writer)
    };
    crate::set_output_file(None);

    match result {
        Ok(summary) => {
            if let Some(ref output_path) = output_path {
                preserve_metadata(input_path, output_path);
            }
            if args.verbosity > 0 && !args.quiet {
                print_stats(file_size, summary.bytes_written, input_path, args);
            }
            if !args.keep && !args.stdout {
                std::fs::remove_file(input_path)?;
            }
            Ok(0)
        }
        Err(e) => {
            // Never leave a partial output file behind
            if let Some(ref output_path) = output_path {
                if output_path.exists() {
                    let _ = std::fs::remove_file(output_path);
                }
            }
            Err(e)
        }
    }
}

pub fn compress_stdin(args: &ParzArgs) -> ParzResult<i32> {
    let mut compressor = ParallelCompressor::new(
        args.processes,
        args.compression_level,
        args.block_size,
    )?;

    let stdin = stdin();
    let reader = BufReader::with_capacity(FILE_BUFFER_SIZE, stdin.lock());
    let stdout = stdout();
    let writer = BufWriter::with_capacity(FILE_BUFFER_SIZE, stdout.lock());

    compressor.compress_stream(reader, writer)?;
    Ok(0)
}

fn compress_directory(dirname: &str, args: &ParzArgs) -> ParzResult<i32> {
    use walkdir::WalkDir;

    let mut exit_code = 0;

    for entry in WalkDir::new(dirname) {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            let path_str = path.to_string_lossy();
            match compress_file(&path_str, args) {
                Ok(code) => {
                    if code != 0 {
                        exit_code = code;
                    }
                }
                Err(e) => {
                    eprintln!("parz: {}: {}", path_str, e);
                    exit_code = 1;
                }
            }
        }
    }

    Ok(exit_code)
}

pub fn output_filename(input_path: &Path, args: &ParzArgs) -> PathBuf {
    let mut name = input_path.as_os_str().to_os_string();
    name.push(&args.suffix);
    PathBuf::from(name)
}

/// Build FNAME/MTIME member metadata from the input file, unless -n.
fn build_member_header(path: &Path, args: &ParzArgs) -> MemberHeader {
    if args.no_name {
        return MemberHeader::default();
    }

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string());

    let mtime = std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    MemberHeader { filename, mtime }
}

/// Copy file permissions and mtime from source to destination.
/// Errors are silently ignored (best-effort, matching gzip behavior).
fn preserve_metadata(src: &Path, dst: &Path) {
    if let Ok(metadata) = std::fs::metadata(src) {
        let _ = std::fs::set_permissions(dst, metadata.permissions());
        if let Ok(mtime) = metadata.modified() {
            let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
        }
    }
}

fn print_stats(input_size: u64, output_size: u64, path: &Path, args: &ParzArgs) {
    let filename = path
        .file_name()
        .unwrap_or_default()
        .to_str()
        .unwrap_or("<unknown>");

    let ratio = if input_size > 0 {
        output_size as f64 / input_size as f64
    } else {
        1.0
    };
    let saved_pct = (1.0 - ratio) * 100.0;

    let (in_size, in_unit) = format_size(input_size);
    let (out_size, out_unit) = format_size(output_size);

    eprintln!(
        "{}: {:.1}{} -> {:.1}{} ({:.1}% saved)",
        filename, in_size, in_unit, out_size, out_unit, saved_pct
    );
}

pub fn format_size(bytes: u64) -> (f64, &'static str) {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        (bytes as f64 / GB as f64, "GB")
    } else if bytes >= MB {
        (bytes as f64 / MB as f64, "MB")
    } else if bytes >= KB {
        (bytes as f64 / KB as f64, "KB")
    } else {
        (bytes as f64, "B")
    }
}
