fn main() {
    println!("clonetree-rs - Clonal Evolution Tree Inference");
    println!();
    println!("Use the clonetree tool to infer a tree from multi-sample variant data:");
    println!("  clonetree     - Evidence tables → evolutionary tree (JSON)");
    println!();
    println!("Modes:");
    println!("  --mode simple  - Maximum compatible tree, conflicting variants are ignored");
    println!("  --mode max-lh  - Maximum-likelihood tree, putative false calls are corrected");
    println!();
    println!("For help:");
    println!("  cargo run --bin clonetree -- --help");
    println!();
    println!("Quick start example:");
    println!("  cargo run --bin clonetree -- --mut-reads reads.tsv --coverage coverage.tsv --output tree.json");
    println!("  cargo run --bin clonetree -- --calls calls.tsv --mode simple --output tree.json.gz");
}
