/* Generate command - emit .upb.h/.upb.c artifacts from a descriptor set */

use crate::codegen::names::{header_filename, source_filename};
use crate::codegen::{header, source};
use crate::descriptor::{DescriptorPool, FileId};
use crate::layout::FileLayout;
use anyhow::{bail, Context};
use prost::Message;
use std::path::{Path, PathBuf};

/* Generator parameters, parsed protoc-style: comma separated key[=value] */
#[derive(Debug)]
pub struct Params {
  pub fasttable: bool,
}

pub fn parse_params(raw: &str) -> anyhow::Result<Params> {
  let mut params = Params { fasttable: false };
  for part in raw.split(',').filter(|p| !p.is_empty()) {
    let key = part.split('=').next().unwrap_or(part);
    match key {
      "fasttable" => params.fasttable = true,
      _ => bail!("Unknown parameter: {}", key),
    }
  }
  Ok(params)
}

pub fn load_pool(descriptor_set: &Path) -> anyhow::Result<(DescriptorPool, Vec<String>)> {
  let bytes = std::fs::read(descriptor_set)
    .with_context(|| format!("failed to read {}", descriptor_set.display()))?;
  let set = prost_types::FileDescriptorSet::decode(bytes.as_slice())
    .context("failed to decode FileDescriptorSet")?;
  let names = set.file.iter().map(|f| f.name().to_string()).collect();
  let pool = DescriptorPool::build(&set)?;
  Ok((pool, names))
}

/* Resolve the requested file names, defaulting to every file in the set */
pub fn select_files(
  pool: &DescriptorPool,
  all_names: &[String],
  requested: &[String],
) -> anyhow::Result<Vec<FileId>> {
  if requested.is_empty() {
    return Ok(all_names
      .iter()
      .filter_map(|name| pool.find_file(name))
      .collect());
  }
  let mut files = Vec::with_capacity(requested.len());
  for name in requested {
    match pool.find_file(name) {
      Some(id) => files.push(id),
      None => bail!("file '{}' is not in the descriptor set", name),
    }
  }
  Ok(files)
}

pub fn run(
  descriptor_set: PathBuf,
  files: Vec<String>,
  raw_params: &str,
  output_dir: PathBuf,
  verbose: bool,
) -> anyhow::Result<()> {
  let params = parse_params(raw_params)?;
  let (pool, all_names) = load_pool(&descriptor_set)?;
  let targets = select_files(&pool, &all_names, &files)?;

  if verbose {
    println!("[~] Loaded {} file(s) from {}", all_names.len(), descriptor_set.display());
    println!("[~] Generating {} file(s), fasttable={}", targets.len(), params.fasttable);
  }

  for file_id in targets {
    let file_name = pool.file(file_id).name.clone();
    let layout = FileLayout::build(&pool, file_id);

    let header_text = header::write_header(&layout);
    let source_text = source::write_source(&layout, params.fasttable);

    let header_path = output_dir.join(header_filename(&file_name));
    let source_path = output_dir.join(source_filename(&file_name));
    if let Some(parent) = header_path.parent() {
      std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&header_path, header_text)
      .with_context(|| format!("failed to write {}", header_path.display()))?;
    std::fs::write(&source_path, source_text)
      .with_context(|| format!("failed to write {}", source_path.display()))?;

    if verbose {
      println!("[✓] {} -> {{{}, {}}}", file_name, header_path.display(), source_path.display());
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fasttable_parameter_is_recognized() {
    assert!(parse_params("fasttable").unwrap().fasttable);
    assert!(parse_params("").is_ok());
    assert!(!parse_params("").unwrap().fasttable);
  }

  #[test]
  fn unknown_parameters_are_rejected() {
    let err = parse_params("speed=11").unwrap_err();
    assert!(err.to_string().contains("Unknown parameter: speed"));
  }
}
