//! File and stdin decompression front end.
//!
//! Decompression is strictly single-threaded: member boundaries in a gzip
//! stream can only be found by decoding up to them, which serializes the
//! scan over the byte stream. The engine is `stream_decode::StreamDecoder`.

use std::fs::File;
use std::io::{self, stdin, stdout, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::cli::ParzArgs;
use crate::error::{ParzError, ParzResult};
use crate::stream_decode::{StreamDecoder, DEFAULT_IO_BUFFER_SIZE};

pub fn decompress_file(filename: &str, args: &ParzArgs) -> ParzResult<i32> {
    if filename == "-" {
        return decompress_stdin(args);
    }

    let input_path = Path::new(filename);
    if !input_path.exists() {
        return Err(ParzError::FileNotFound(filename.to_string()));
    }
    if input_path.is_dir() {
        return Err(ParzError::invalid_argument(format!(
            "{} is a directory",
            filename
        )));
    }

    let input_file = File::open(input_path)?;
    let file_size = input_file.metadata()?.len();
    let reader = BufReader::with_capacity(DEFAULT_IO_BUFFER_SIZE, input_file);
    let mut decoder = StreamDecoder::new(DEFAULT_IO_BUFFER_SIZE)?;

    // -t: decode for verification only, write nothing
    if args.test {
        return match decoder.decode(reader, io::sink()) {
            Ok(_) => {
                if !args.quiet {
                    eprintln!("parz: {}: OK", filename);
                }
                Ok(0)
            }
            // Bad data is the answer -t asks for; report it and keep going
            Err(e) if e.is_data_error() => {
                if !args.quiet {
                    eprintln!("parz: {}: {}", filename, e);
                    eprintln!("parz: {}: NOT OK", filename);
                }
                Ok(1)
            }
            Err(e) => Err(e),
        };
    }

    let output_path = if args.stdout {
        None
    } else {
        Some(output_filename(input_path, args)?)
    };

    if let Some(ref output_path) = output_path {
        if output_path.exists() && !args.force {
            return Err(ParzError::invalid_argument(format!(
                "output file {} already exists (use -f to overwrite)",
                output_path.display()
            )));
        }
    }

    let result = if let Some(ref output_path) = output_path {
        crate::set_output_file(Some(output_path.to_string_lossy().to_string()));
        let writer = BufWriter::with_capacity(DEFAULT_IO_BUFFER_SIZE, File::create(output_path)?);
        decoder.decode(reader, writer)
    } else {
        let stdout = stdout();
        let writer = BufWriter::with_capacity(DEFAULT_IO_BUFFER_SIZE, stdout.lock());
        decoder.decode(reader, writer)
    };
    crate::set_output_file(None);

    match result {
        Ok(summary) => {
            if args.verbosity > 0 && !args.quiet {
                print_stats(file_size, summary.bytes_written, summary.members, input_path);
            }
            if !args.keep && !args.stdout {
                std::fs::remove_file(input_path)?;
            }
            Ok(0)
        }
        Err(e) => {
            if let Some(ref output_path) = output_path {
                if output_path.exists() {
                    let _ = std::fs::remove_file(output_path);
                }
            }
            Err(e)
        }
    }
}

pub fn decompress_stdin(args: &ParzArgs) -> ParzResult<i32> {
    let stdin = stdin();
    let reader = BufReader::with_capacity(DEFAULT_IO_BUFFER_SIZE, stdin.lock());
    let mut decoder = StreamDecoder::new(DEFAULT_IO_BUFFER_SIZE)?;

    if args.test {
        decoder.decode(reader, io::sink())?;
        return Ok(0);
    }

    let stdout = stdout();
    let writer = BufWriter::with_capacity(DEFAULT_IO_BUFFER_SIZE, stdout.lock());
    decoder.decode(reader, writer)?;
    Ok(0)
}

/// Derive the decompressed output name by stripping the suffix; a name
/// without the expected suffix is an error rather than a guess.
fn output_filename(input_path: &Path, args: &ParzArgs) -> ParzResult<PathBuf> {
    let name = input_path.to_string_lossy();
    match name.strip_suffix(&args.suffix) {
        Some(stripped) if !stripped.is_empty() => Ok(PathBuf::from(stripped)),
        _ => Err(ParzError::invalid_argument(format!(
            "{}: unknown suffix (expected {}) -- use -c to decompress to stdout",
            name, args.suffix
        ))),
    }
}

fn print_stats(input_size: u64, output_size: u64, members: u64, path: &Path) {
    use crate::compression::format_size;

    let filename = path
        .file_name()
        .unwrap_or_default()
        .to_str()
        .unwrap_or("<unknown>");

    let (in_size, in_unit) = format_size(input_size);
    let (out_size, out_unit) = format_size(output_size);

    eprintln!(
        "{}: {:.1}{} -> {:.1}{} ({} members)",
        filename, in_size, in_unit, out_size, out_unit, members
    );
}
