use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = mediafetchctl::Cli::parse();
    if let Err(err) = mediafetchctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
