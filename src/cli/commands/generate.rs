//! Generate command implementation

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::datagen::{replicate, write_dataset, DatasetShape};

pub struct GenerateParams {
    pub output: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub seed: u64,
    pub na_every: Option<usize>,
    pub replicate: Option<usize>,
}

/// Write a dataset and print its column sums
pub fn run_generate_command(params: GenerateParams) -> Result<()> {
    let mut shape = DatasetShape::new(params.rows, params.columns, params.seed);
    if let Some(every) = params.na_every {
        shape = shape.with_na_every(every);
    }
    let sums = write_dataset(&params.output, shape)
        .with_context(|| format!("Failed to generate {}", params.output.display()))?;

    println!(
        "wrote {} ({} rows x {} columns)",
        params.output.display(),
        params.rows,
        params.columns
    );
    for (column, sum) in sums.iter().enumerate() {
        println!("  sum(col[{}]) = {}", column, sum);
    }

    if let Some(times) = params.replicate {
        let dest = replicated_path(&params.output, times);
        replicate(&params.output, &dest, times)?;
        println!("wrote {} (x{})", dest.display(), times);
    }
    Ok(())
}

/// `data.csv` replicated 5 times becomes `data.5x.csv`
fn replicated_path(output: &std::path::Path, times: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{}.{}x.{}", stem, times, ext.to_string_lossy()),
        None => format!("{}.{}x", stem, times),
    };
    output.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicated_path() {
        assert_eq!(
            replicated_path(std::path::Path::new("/d/covtype.data"), 5),
            PathBuf::from("/d/covtype.5x.data")
        );
        assert_eq!(
            replicated_path(std::path::Path::new("plain"), 2),
            PathBuf::from("plain.2x")
        );
    }
}
