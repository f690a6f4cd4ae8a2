//! hypercrypt: encrypt a file into scrambled segments plus a key descriptor,
//! or reverse the transform.
//!
//!   hypercrypt -e my_file.txt            → my_file.txt.hckey + my_file.txt.hc
//!   hypercrypt -e -s 3 my_file.txt       → my_file.txt.01.hc … my_file.txt.03.hc
//!   hypercrypt -d my_file.txt.hckey      → my_file.txt
//!   hypercrypt -d -j 3 my_file.txt.hckey → joins the three pieces back
//!
//! Outputs land in the current directory; the input's directory component is
//! dropped when names are derived.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use hc_core::{ProgressEvent, ProgressFn};
use hc_engine::HcEngine;

#[derive(Parser, Debug)]
#[command(
    name = "hypercrypt",
    version,
    about = "Segment-permutation file encryption",
    group(ArgGroup::new("mode").required(true).args(["encrypt", "decrypt"]))
)]
struct Cli {
    /// Encrypt FILE into FILE.hc (or FILE.NN.hc with --splits) plus FILE.hckey
    #[arg(short = 'e', long = "encrypt", value_name = "FILE")]
    encrypt: Option<PathBuf>,

    /// Split the ciphertext across N output files
    #[arg(
        short = 's',
        long = "splits",
        value_name = "N",
        requires = "encrypt",
        value_parser = clap::value_parser!(u32).range(2..=16)
    )]
    splits: Option<u32>,

    /// Decrypt the file set described by KEYFILE into KEYFILE's base name
    #[arg(
        short = 'd',
        long = "decrypt",
        value_name = "KEYFILE",
        conflicts_with = "splits"
    )]
    decrypt: Option<PathBuf>,

    /// Join N ciphertext files while decrypting
    #[arg(
        short = 'j',
        long = "joins",
        value_name = "N",
        requires = "decrypt",
        value_parser = clap::value_parser!(u32).range(2..=16)
    )]
    joins: Option<u32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = HcEngine::new();
    let mut progress = progress_renderer();

    if let Some(input) = &cli.encrypt {
        engine.encrypt_file(cli.splits.unwrap_or(0), input, Some(&mut progress))?;
    } else if let Some(key_file) = &cli.decrypt {
        engine.decrypt_file(cli.joins.unwrap_or(0), key_file, Some(&mut progress))?;
    } else {
        unreachable!("clap enforces one of --encrypt/--decrypt");
    }

    println!("Success!");
    Ok(())
}

fn make_percent_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{prefix:>10.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb
}

fn phase(prefix: &str, percent: u8, bar: &mut Option<ProgressBar>) {
    let pb = bar.get_or_insert_with(|| make_percent_bar(prefix));
    pb.set_position(u64::from(percent));
}

/// Translate engine progress events into one indicatif bar per phase.
fn progress_renderer() -> ProgressFn {
    let mut bar: Option<ProgressBar> = None;

    Box::new(move |event| {
        match event {
            ProgressEvent::KeyCreationStart => {
                bar = Some(make_percent_bar("key"));
            }
            ProgressEvent::KeyCreationProgress { percent } => {
                phase("key", percent, &mut bar);
            }
            ProgressEvent::KeyCreationEnd => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message("done");
                }
            }

            ProgressEvent::EncryptProgress { percent } => {
                phase("encrypt", percent, &mut bar);
            }
            ProgressEvent::EncryptEnd => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message("done");
                }
            }

            ProgressEvent::DecryptProgress { percent } => {
                phase("decrypt", percent, &mut bar);
            }
            ProgressEvent::DecryptEnd => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message("done");
                }
            }

            ProgressEvent::EncryptSectionProgress { percent }
            | ProgressEvent::DecryptSectionProgress { percent } => {
                if let Some(pb) = &bar {
                    pb.set_message(format!("section {percent:>3}%"));
                }
            }
            ProgressEvent::EncryptSectionEnd | ProgressEvent::DecryptSectionEnd => {
                if let Some(pb) = &bar {
                    pb.set_message("");
                }
            }

            ProgressEvent::EncryptStart
            | ProgressEvent::DecryptStart
            | ProgressEvent::EncryptSectionStart
            | ProgressEvent::DecryptSectionStart => {}
        }

        Ok(())
    })
}
