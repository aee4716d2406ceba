/* Layout command - print computed message layouts without emitting code */

use super::generate::{load_pool, select_files};
use crate::layout::FileLayout;
use crate::minitable::PointerWidth;
use std::path::PathBuf;

pub fn run(descriptor_set: PathBuf, files: Vec<String>) -> anyhow::Result<()> {
  let (pool, all_names) = load_pool(&descriptor_set)?;
  let targets = select_files(&pool, &all_names, &files)?;

  for file_id in targets {
    let file = pool.file(file_id);
    println!("{}:", file.name);
    let layout = FileLayout::build(&pool, file_id);

    for &msg_id in layout.messages() {
      let msg = pool.message(msg_id);
      let mt32 = layout.mini_table(msg_id, PointerWidth::W32);
      let mt64 = layout.mini_table(msg_id, PointerWidth::W64);
      println!(
        "  {}: size {}/{}, {} field(s), dense_below {}, required {}",
        msg.full_name,
        mt32.size,
        mt64.size,
        mt64.fields.len(),
        mt64.dense_below,
        mt64.required_count
      );
      for field in &mt64.fields {
        let f32_ = mt32.field_by_number(field.number).unwrap();
        println!(
          "    #{} offset {}/{} presence {} mode {:?}",
          field.number, f32_.offset, field.offset, field.presence, field.mode
        );
      }
    }
  }

  Ok(())
}
