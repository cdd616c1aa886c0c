use clap::Parser;

fn main() {
    let cli = berrizctl::Cli::parse();
    std::process::exit(berrizctl::run(cli));
}
