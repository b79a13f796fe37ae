use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "hashsum",
    version,
    about = "Print the SHA-256 of every regular file under the given paths",
    long_about = "`hashsum` prints one line per regular file found at or below each path:

    <sha256 hex>  <absolute path>

Symlinks to files are hashed, symlinks to directories are not descended into. Unreadable paths are reported on stderr and make the exit status non-zero."
)]
struct Args {
    /// Files or directories to hash
    #[arg(required = true)]
    paths: Vec<std::path::PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let mut failed = false;
    for path in &args.paths {
        match devsync::hashsum::hash_tree(path).await {
            Ok(tree) => {
                for file_hash in &tree.hashes {
                    println!("{file_hash}");
                }
                for error in &tree.unreadable {
                    eprintln!("hashsum: {error:#}");
                }
                failed |= !tree.unreadable.is_empty();
            }
            Err(error) => {
                eprintln!("hashsum: {error:#}");
                failed = true;
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
}
