use clap::{Parser, Subcommand};
use std::path::PathBuf;

use upbc::cmds;

#[derive(Parser)]
#[command(name = "upbc")]
#[command(about = "Mini-table code generator for the upb runtime", long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /* Generate .upb.h/.upb.c artifacts from a serialized descriptor set */
  Generate {
    /* Binary google.protobuf.FileDescriptorSet (protoc --descriptor_set_out) */
    #[arg(short = 'd', long = "descriptor-set", value_name = "FILE", required = true)]
    descriptor_set: PathBuf,

    /* Proto file names to generate; defaults to every file in the set */
    #[arg(short = 'f', long = "file", value_name = "NAME")]
    files: Vec<String>,

    /* Generator parameters, comma separated (only "fasttable" is known) */
    #[arg(short = 'p', long = "param", value_name = "PARAMS", default_value = "")]
    params: String,

    /* Output directory for generated code */
    #[arg(short = 'o', long = "output", value_name = "DIR", default_value = "generated")]
    output_dir: PathBuf,

    /* Enable verbose output */
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
  },

  /* Print the computed message layouts without emitting code */
  Layout {
    /* Binary google.protobuf.FileDescriptorSet (protoc --descriptor_set_out) */
    #[arg(short = 'd', long = "descriptor-set", value_name = "FILE", required = true)]
    descriptor_set: PathBuf,

    /* Proto file names to inspect; defaults to every file in the set */
    #[arg(short = 'f', long = "file", value_name = "NAME")]
    files: Vec<String>,
  },
}

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Generate {
      descriptor_set,
      files,
      params,
      output_dir,
      verbose,
    } => {
      cmds::generate::run(descriptor_set, files, &params, output_dir, verbose)?;
    }

    Commands::Layout { descriptor_set, files } => {
      cmds::layout::run(descriptor_set, files)?;
    }
  }

  Ok(())
}
