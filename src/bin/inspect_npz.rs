use anyhow::Result;
use mlngen::mln::npz::{load_csr_npz, read_npz};
use std::{env, path::Path, process::exit};

fn main() {
    // Expect exactly one CLI argument: path to an adjacency .npz file.
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <NPZ_FILE>", args[0]);
        exit(1);
    }
    if let Err(e) = inspect_npz(Path::new(&args[1])) {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}

/// Print the member arrays, matrix shape and value histogram of one `.npz`.
fn inspect_npz(path: &Path) -> Result<()> {
    let file_size = std::fs::metadata(path)?.len();
    println!("=== NPZ File: {} ===", path.display());
    println!("File-size on disk:    {} bytes", file_size);
    println!();

    // 1) Members
    println!("=== Members ===");
    for (name, array) in read_npz(path)? {
        println!(
            "- {:<10} | dtype: {:<5} | shape: {:?}",
            name, array.descr, array.shape
        );
    }
    println!();

    // 2) Matrix
    let m = load_csr_npz(path)?;
    let (rows, cols) = m.shape;
    let empty_rows = (0..rows).filter(|&r| m.row(r).0.is_empty()).count();
    println!("=== Matrix ===");
    println!("Shape:                {} x {}", rows, cols);
    println!("Non-zeros:            {}", m.nnz());
    println!("Rows without edges:   {}", empty_rows);
    if rows > 0 {
        println!("Mean out-degree:      {:.3}", m.nnz() as f64 / rows as f64);
    }
    println!();

    // 3) Binary codes
    println!("=== Values ===");
    for (value, count) in m.value_counts() {
        println!("{:>20} (bits {:064b}) x {}", value, value, count);
    }
    Ok(())
}
