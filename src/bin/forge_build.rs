use bootforge::cli::{run_build, BuildCli};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = BuildCli::parse();
    let code = run_build(cli).await;
    std::process::exit(code);
}
