use clap::Parser;
use qimao_dl::cli::{self, Args};

fn main() {
    let args = Args::parse();
    let Err(e) = cli::run(&args) else {
        return;
    };
    eprintln!("Error: {}", e);
    if args.verbose {
        for cause in cli::causes(&e) {
            eprintln!("  caused by: {}", cause);
        }
    }
    std::process::exit(e.exit_code());
}
