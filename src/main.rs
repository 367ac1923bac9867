use clap::Parser;
use log::{error, info};
use marlin::fasta::FastaReader;
use marlin::seqdb::SequenceIndexDb;
use std::fs::File;
use std::io::{self, BufWriter};
use std::process::exit;

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Path to the FASTA file.
    #[clap(short = 'f', long, value_parser)]
    fasta_file: String,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

/// Command-line tool for inspecting and indexing FASTA inputs.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Ingest every record into one padded buffer and print the index
    Index {
        #[clap(flatten)]
        common: CommonOpts,

        /// Write the sequence index to this file
        #[clap(short = 'o', long, value_parser)]
        output: Option<String>,

        /// Compute per-record MD5 checksums
        #[clap(long, action)]
        md5: bool,

        /// Fold sequence characters to uppercase
        #[clap(long, action)]
        to_upper: bool,

        /// Zero-filled bytes reserved after the decoded buffer
        #[clap(long, value_parser, default_value_t = 0)]
        padding: u32,
    },
    /// Stream records, printing title and decoded length per record
    Scan {
        #[clap(flatten)]
        common: CommonOpts,

        /// Skip this many records before printing
        #[clap(long, value_parser, default_value_t = 0)]
        skip: usize,
    },
}

fn main() {
    let args = Args::parse();

    let result = match args {
        Args::Index {
            common,
            output,
            md5,
            to_upper,
            padding,
        } => {
            init_logger(&common);
            run_index(&common.fasta_file, output.as_deref(), md5, to_upper, padding)
        }
        Args::Scan { common, skip } => {
            init_logger(&common);
            run_scan(&common.fasta_file, skip)
        }
    };

    if let Err(e) = result {
        error!("{e}");
        exit(1);
    }
}

fn init_logger(common: &CommonOpts) {
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();
}

fn run_index(
    fasta_file: &str,
    output: Option<&str>,
    md5: bool,
    to_upper: bool,
    padding: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = FastaReader::open(fasta_file)?;
    reader.set_compute_checksum(md5);
    reader.set_space_padding(padding);
    if to_upper {
        reader.set_to_upper();
    }

    let mut db = SequenceIndexDb::new();
    let genome = reader.read_all_into_one(Some(&mut db))?;
    info!(
        "{}: {} records, {} decoded bytes",
        fasta_file,
        db.num_records(),
        genome.len()
    );

    for i in 0..db.num_records() {
        let (start, _) = db.record_bounds(i);
        match db.checksum(i) {
            Some(digest) => println!(
                "{}\t{}\t{}\t{}",
                db.names[i],
                start,
                db.record_length(i),
                digest
            ),
            None => println!("{}\t{}\t{}", db.names[i], start, db.record_length(i)),
        }
    }

    if let Some(output) = output {
        let file = File::create(output)
            .map_err(|e| io::Error::other(format!("Failed to create '{output}': {e}")))?;
        let mut writer = BufWriter::new(file);
        db.save(&mut writer)?;
        info!("wrote sequence index to {output}");
    }
    Ok(())
}

fn run_scan(fasta_file: &str, skip: usize) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = FastaReader::open(fasta_file)?;
    if skip > 0 && !reader.advance(skip) {
        info!("fewer than {skip} records in {fasta_file}, nothing to print");
        return Ok(());
    }
    while let Some(record) = reader.get_next()? {
        println!("{}\t{}", record.title, record.len());
    }
    Ok(())
}
