use bootforge::cli::{run_boot, BootCli};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = BootCli::parse();
    let code = run_boot(cli).await;
    std::process::exit(code);
}
